use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hookgen::bytecode::disasm::disassemble;
use hookgen::metadata::{MemberId, RuntimeFlavor};
use hookgen::{GeneratorConfig, HookManifest, ModuleImage, generate};

#[derive(Parser)]
#[command(name = "hookgen")]
#[command(about = "Generate hook shims from a hook manifest")]
#[command(version)]
struct Cli {
    /// Hook manifest (JSON)
    #[arg(value_name = "MANIFEST")]
    manifest: PathBuf,

    /// Bind against System.Runtime instead of mscorlib
    #[arg(long)]
    core: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_env("HOOKGEN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if !cli.manifest.is_file() {
        bail!("manifest '{}' does not exist", cli.manifest.display());
    }

    let flavor = if cli.core {
        RuntimeFlavor::Core
    } else {
        RuntimeFlavor::Framework
    };
    let config = GeneratorConfig::default().with_flavor(flavor);

    let manifest = HookManifest::load(&cli.manifest)
        .with_context(|| format!("failed to load '{}'", cli.manifest.display()))?;
    let registry = generate(&manifest, &config).context("hook generation failed")?;

    if tracing::enabled!(tracing::Level::DEBUG) {
        for (id, method) in registry.methods() {
            if let Some(body) = &method.body {
                let name = registry.member_name(MemberId::Method(id));
                debug!("\n{}", disassemble(&name, body));
            }
        }
    }

    let image = ModuleImage::build(&registry, flavor)?;
    let output = cli.manifest.with_extension("hooks.bin");
    image
        .write(&output)
        .with_context(|| format!("failed to write '{}'", output.display()))?;

    info!(output = %output.display(), types = image.types.len(), "wrote hook image");
    Ok(())
}

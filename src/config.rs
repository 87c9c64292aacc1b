use serde::{Deserialize, Serialize};

use crate::bytecode::finalize::FinalizeOptions;
use crate::metadata::import::RuntimeFlavor;

/// Settings for one generation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub flavor: RuntimeFlavor,
    /// Namespace of every generated type.
    pub namespace: String,
    /// Name of the generated module. Empty means derive it from the target
    /// assembly.
    pub module_name: String,
    pub compact_branches: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            flavor: RuntimeFlavor::Framework,
            namespace: "Hooks".to_string(),
            module_name: String::new(),
            compact_branches: true,
        }
    }
}

impl GeneratorConfig {
    pub fn with_flavor(mut self, flavor: RuntimeFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    /// Module name for a run against `target_assembly`.
    pub fn module_name_for(&self, target_assembly: &str) -> String {
        if self.module_name.is_empty() {
            format!("{}.{}", target_assembly, self.namespace)
        } else {
            self.module_name.clone()
        }
    }

    pub fn finalize_options(&self) -> FinalizeOptions {
        FinalizeOptions {
            compact_branches: self.compact_branches,
        }
    }
}

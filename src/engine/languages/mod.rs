mod command;
mod entry;
mod sql;

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use async_trait::async_trait;

use crate::engine::{
    catalog::{Capability, LanguageCatalog, LanguageDescriptor},
    error::ExecError,
    models::{ExecutionLimits, ExecutionResult},
    sandbox::{Sandbox, Workspace},
};

pub use command::CommandPlugin;
pub use entry::EntryResolution;
pub use sql::SqlPlugin;

/// Source text written into a workspace.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub entry: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompileOutcome {
    Skipped,
    Built { artifact: PathBuf },
    Failed { stderr: String, exit_code: i32 },
    TimedOut { stderr: String },
}

/// What the run phase needs: the materialized source and, for compiled
/// languages, the artifact the compile phase produced.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub source: SourceFile,
    pub artifact: Option<PathBuf>,
}

/// Compile/run protocol for one language.
#[async_trait]
pub trait LanguagePlugin: Send + Sync {
    fn descriptor(&self) -> &LanguageDescriptor;

    async fn materialize(
        &self,
        workspace: &Workspace,
        code: &str,
    ) -> Result<SourceFile, ExecError> {
        let descriptor = self.descriptor();
        let entry = descriptor.entry.resolve(code);
        let path = workspace
            .write(&descriptor.source_file_name(&entry), code.as_bytes())
            .await?;
        Ok(SourceFile { path, entry })
    }

    async fn compile(
        &self,
        sandbox: &Sandbox,
        workspace: &Workspace,
        source: &SourceFile,
    ) -> Result<CompileOutcome, ExecError>;

    async fn run(
        &self,
        sandbox: &Sandbox,
        workspace: &Workspace,
        prepared: &Prepared,
        stdin: &str,
        limits: &ExecutionLimits,
    ) -> Result<ExecutionResult, ExecError>;
}

/// Maps catalog ids to plugins. Built once from the catalog at startup.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<u32, Arc<dyn LanguagePlugin>>,
}

impl PluginRegistry {
    pub fn from_catalog(catalog: &LanguageCatalog) -> Self {
        let mut registry = Self::default();
        for descriptor in catalog.iter() {
            let plugin: Arc<dyn LanguagePlugin> = match descriptor.capability {
                Capability::InProcess => Arc::new(SqlPlugin::new(descriptor.clone())),
                Capability::CompileAndLink | Capability::Interpret => {
                    Arc::new(CommandPlugin::new(descriptor.clone()))
                }
            };
            registry.insert(plugin);
        }
        registry
    }

    pub fn insert(&mut self, plugin: Arc<dyn LanguagePlugin>) {
        self.plugins.insert(plugin.descriptor().id, plugin);
    }

    pub fn resolve(&self, language_id: u32) -> Option<Arc<dyn LanguagePlugin>> {
        self.plugins.get(&language_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::PluginRegistry;
    use crate::engine::{catalog::LanguageCatalog, config::ToolchainConfig};

    #[test]
    fn every_catalog_entry_has_a_plugin() {
        let catalog = LanguageCatalog::standard(&ToolchainConfig::default()).unwrap();
        let registry = PluginRegistry::from_catalog(&catalog);
        for descriptor in catalog.iter() {
            let plugin = registry.resolve(descriptor.id).unwrap();
            assert_eq!(plugin.descriptor().name, descriptor.name);
        }
        assert!(registry.resolve(99).is_none());
    }
}

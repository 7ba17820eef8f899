use std::{
    collections::BTreeMap,
    ffi::OsString,
    path::{Path, PathBuf},
};

use crate::engine::{
    config::ToolchainConfig,
    error::CatalogError,
    languages::EntryResolution,
    models::{LanguageDetail, LanguageSummary},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    CompileAndLink,
    Interpret,
    InProcess,
}

/// One argv element before substitution. Placeholders always expand to a
/// single argument; nothing is ever handed to a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Lit(String),
    Source,
    Artifact,
    Workspace,
    Entry,
    /// JVM style max heap flag, `-Xmx<kb>k`.
    MaxHeap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: Token,
    pub args: Vec<Token>,
}

/// Values substituted into a [`CommandTemplate`].
#[derive(Debug, Clone)]
pub struct Bindings<'a> {
    pub source: &'a Path,
    pub artifact: &'a Path,
    pub workspace: &'a Path,
    pub entry: &'a str,
    pub memory_kb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl CommandTemplate {
    pub fn new(program: Token, args: impl IntoIterator<Item = Token>) -> Self {
        Self {
            program,
            args: args.into_iter().collect(),
        }
    }

    pub fn tool(program: &str, args: impl IntoIterator<Item = Token>) -> Self {
        Self::new(Token::Lit(program.to_string()), args)
    }

    pub fn render(&self, bindings: &Bindings<'_>) -> RenderedCommand {
        RenderedCommand {
            program: PathBuf::from(expand(&self.program, bindings)),
            args: self.args.iter().map(|t| expand(t, bindings)).collect(),
        }
    }
}

fn expand(token: &Token, bindings: &Bindings<'_>) -> OsString {
    match token {
        Token::Lit(value) => OsString::from(value),
        Token::Source => bindings.source.as_os_str().to_owned(),
        Token::Artifact => bindings.artifact.as_os_str().to_owned(),
        Token::Workspace => bindings.workspace.as_os_str().to_owned(),
        Token::Entry => OsString::from(bindings.entry),
        Token::MaxHeap => OsString::from(format!("-Xmx{}k", bindings.memory_kb.max(1024))),
    }
}

fn lit(value: &str) -> Token {
    Token::Lit(value.to_string())
}

#[derive(Debug, Clone)]
pub struct LanguageDescriptor {
    pub id: u32,
    pub name: &'static str,
    pub source_extension: &'static str,
    pub capability: Capability,
    pub entry: EntryResolution,
    pub compile: Option<CommandTemplate>,
    pub run: Option<CommandTemplate>,
    /// Added to the submission memory limit to cover the runtime's own
    /// footprint (interpreter, JVM).
    pub runtime_memory_overhead_kb: u64,
}

impl LanguageDescriptor {
    pub fn needs_compile(&self) -> bool {
        self.compile.is_some()
    }

    pub fn source_file_name(&self, entry: &str) -> String {
        format!("{entry}{}", self.source_extension)
    }
}

/// Read-only after construction; share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct LanguageCatalog {
    languages: BTreeMap<u32, LanguageDescriptor>,
}

impl LanguageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: LanguageDescriptor) -> Result<(), CatalogError> {
        if let Some(existing) = self.languages.get(&descriptor.id) {
            return Err(CatalogError::DuplicateId {
                id: descriptor.id,
                existing: existing.name.to_string(),
            });
        }
        self.languages.insert(descriptor.id, descriptor);
        Ok(())
    }

    pub fn lookup(&self, id: u32) -> Option<&LanguageDescriptor> {
        self.languages.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LanguageDescriptor> {
        self.languages.values()
    }

    pub fn list(&self) -> Vec<LanguageSummary> {
        self.iter()
            .map(|d| LanguageSummary {
                id: d.id,
                name: d.name.to_string(),
            })
            .collect()
    }

    pub fn detail(&self, id: u32) -> Option<LanguageDetail> {
        self.lookup(id).map(|d| LanguageDetail {
            id: d.id,
            name: d.name.to_string(),
            extension: d.source_extension.to_string(),
            compiled: d.needs_compile(),
        })
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    /// The canonical id table every component resolves languages through.
    pub fn standard(tools: &ToolchainConfig) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        let native = |id, name, ext, compiler: &str, std_flag: Option<&str>| {
            let mut args = vec![Token::Source, lit("-O2")];
            if let Some(flag) = std_flag {
                args.push(lit(flag));
            }
            args.extend([lit("-o"), Token::Artifact]);
            LanguageDescriptor {
                id,
                name,
                source_extension: ext,
                capability: Capability::CompileAndLink,
                entry: EntryResolution::Fixed("main"),
                compile: Some(CommandTemplate::tool(compiler, args)),
                run: Some(CommandTemplate::new(Token::Artifact, [])),
                runtime_memory_overhead_kb: 0,
            }
        };

        catalog.register(native(1, "C", ".c", &tools.cc, Some("-lm")))?;
        catalog.register(native(2, "C++", ".cpp", &tools.cxx, None))?;
        catalog.register(LanguageDescriptor {
            id: 3,
            name: "Python",
            source_extension: ".py",
            capability: Capability::Interpret,
            entry: EntryResolution::Fixed("main"),
            compile: None,
            run: Some(CommandTemplate::tool(&tools.python, [Token::Source])),
            runtime_memory_overhead_kb: 32 * 1024,
        })?;
        catalog.register(LanguageDescriptor {
            id: 4,
            name: "Java",
            source_extension: ".java",
            capability: Capability::CompileAndLink,
            entry: EntryResolution::PublicType { default: "Main" },
            compile: Some(CommandTemplate::tool(
                &tools.javac,
                [lit("-encoding"), lit("UTF-8"), lit("-d"), Token::Workspace, Token::Source],
            )),
            run: Some(CommandTemplate::tool(
                &tools.java,
                [
                    Token::MaxHeap,
                    lit("-XX:+UseSerialGC"),
                    lit("-cp"),
                    Token::Workspace,
                    Token::Entry,
                ],
            )),
            runtime_memory_overhead_kb: 512 * 1024,
        })?;
        catalog.register(LanguageDescriptor {
            id: 5,
            name: "JavaScript",
            source_extension: ".js",
            capability: Capability::Interpret,
            entry: EntryResolution::Fixed("main"),
            compile: None,
            run: Some(CommandTemplate::tool(&tools.node, [Token::Source])),
            runtime_memory_overhead_kb: 256 * 1024,
        })?;
        catalog.register(LanguageDescriptor {
            id: 6,
            name: "Go",
            source_extension: ".go",
            capability: Capability::CompileAndLink,
            entry: EntryResolution::Fixed("main"),
            compile: Some(CommandTemplate::tool(
                &tools.go,
                [lit("build"), lit("-o"), Token::Artifact, Token::Source],
            )),
            run: Some(CommandTemplate::new(Token::Artifact, [])),
            runtime_memory_overhead_kb: 64 * 1024,
        })?;
        catalog.register(LanguageDescriptor {
            id: 7,
            name: "Rust",
            source_extension: ".rs",
            capability: Capability::CompileAndLink,
            entry: EntryResolution::Fixed("main"),
            compile: Some(CommandTemplate::tool(
                &tools.rustc,
                [
                    lit("--edition"),
                    lit("2021"),
                    lit("-O"),
                    lit("-o"),
                    Token::Artifact,
                    Token::Source,
                ],
            )),
            run: Some(CommandTemplate::new(Token::Artifact, [])),
            runtime_memory_overhead_kb: 0,
        })?;
        catalog.register(LanguageDescriptor {
            id: 8,
            name: "SQL",
            source_extension: ".sql",
            capability: Capability::InProcess,
            entry: EntryResolution::Fixed("main"),
            compile: None,
            run: None,
            runtime_memory_overhead_kb: 0,
        })?;
        Ok(catalog)
    }
}

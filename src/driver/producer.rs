use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Mutex, PoisonError},
};

/// Upstream source of categories and extracted table text, typically a
/// generative model. Treated as unreliable: anything it returns is parsed
/// and validated before it reaches a dataset.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Category labels present in `text`.
    async fn detect_categories(&self, text: &str) -> Result<Vec<String>>;

    /// CSV text (header first) for `category`. `header_hint` holds the columns
    /// of the existing dataset, empty when there is none.
    async fn extract_table(
        &self,
        text: &str,
        category: &str,
        header_hint: &[String],
    ) -> Result<String>;

    fn name(&self) -> &'static str;
}

/// Recorded producer responses, as stored in a replay file:
///
/// ```json
/// { "categories": ["economy"], "tables": { "economy": "date,value\n2024,3.1\n" } }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Script {
    pub categories: Vec<String>,
    #[serde(default)]
    pub tables: HashMap<String, String>,
}

/// Producer that replays a [`Script`]. Remembers every header hint it was
/// given so callers can inspect them.
#[derive(Debug, Default)]
pub struct ScriptedProducer {
    script: Script,
    hints: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedProducer {
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_script(Script {
            categories: categories.into_iter().map(Into::into).collect(),
            tables: HashMap::new(),
        })
    }

    pub fn from_script(script: Script) -> Self {
        Self {
            script,
            hints: Mutex::new(Vec::new()),
        }
    }

    /// Load a replay file (JSON, see [`Script`]).
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading replay file {}", path.display()))?;
        let script: Script = serde_json::from_str(&text)
            .with_context(|| format!("parsing replay file {}", path.display()))?;
        Ok(Self::from_script(script))
    }

    pub fn with_table(mut self, category: &str, table: &str) -> Self {
        self.script
            .tables
            .insert(category.to_string(), table.to_string());
        self
    }

    /// `(category, header_hint)` for every extraction so far, in call order.
    pub fn hints(&self) -> Vec<(String, Vec<String>)> {
        self.hints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Producer for ScriptedProducer {
    async fn detect_categories(&self, _text: &str) -> Result<Vec<String>> {
        Ok(self.script.categories.clone())
    }

    async fn extract_table(
        &self,
        _text: &str,
        category: &str,
        header_hint: &[String],
    ) -> Result<String> {
        self.hints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((category.to_string(), header_hint.to_vec()));
        self.script
            .tables
            .get(category)
            .cloned()
            .ok_or_else(|| anyhow!("no scripted table for category `{}`", category))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

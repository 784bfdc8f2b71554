//! Edit scripts: a JSON array of steps replayed against a provider wrapping
//! a [`MemoryDataSource`].
//!
//! ```json
//! [
//!   { "op": "add", "row": { "id": "x", "name": "Xena" } },
//!   { "op": "update", "row": { "id": "a", "name": "Ada L." } },
//!   { "op": "remove", "key": "b" },
//!   { "op": "reset", "key": "a" },
//!   { "op": "submit", "reject": ["x"] }
//! ]
//! ```
//!
//! `add` rows without a key get one from the provider's key generator.
//! `submit` pushes every submittable edit to the source; keys listed in
//! `reject` are reverted with an error message instead.

use serde::Deserialize;
use serde_json::Value;
use stagedata_core::{
    BufferingDataProvider, DataSource, EditItem, EditStatus, FetchByKeysParameters, Item,
    ItemMessage, MemoryDataSource, ProviderError, ProviderEvent,
};
use std::collections::HashSet;
use tokio::sync::broadcast;

/// Provider flavour the script runner drives.
pub type ScriptProvider = BufferingDataProvider<MemoryDataSource>;

/// One step of an edit script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ScriptStep {
    Add {
        row: Value,
    },
    Update {
        row: Value,
    },
    Remove {
        key: String,
    },
    /// Reset one key, or every unsubmitted edit when `key` is absent.
    Reset {
        #[serde(default)]
        key: Option<String>,
    },
    Submit {
        #[serde(default)]
        reject: Vec<String>,
    },
}

/// Parse a script from JSON text.
///
/// # Errors
/// Returns [`ProviderError::Serialization`] for malformed scripts.
pub fn parse_script(text: &str) -> Result<Vec<ScriptStep>, ProviderError> {
    Ok(serde_json::from_str(text)?)
}

/// What a script run did.
#[derive(Debug, Default, Clone)]
pub struct ScriptReport {
    pub steps: usize,
    pub submitted: Vec<EditItem<String, Value>>,
    pub rejected: Vec<EditItem<String, Value>>,
}

/// Replays steps and reconciles the source's events after each one.
pub struct ScriptRunner {
    provider: ScriptProvider,
    key_attribute: String,
    upstream: broadcast::Receiver<ProviderEvent<String, Value>>,
}

impl ScriptRunner {
    pub fn new(provider: ScriptProvider, key_attribute: impl Into<String>) -> Self {
        let upstream = provider.source().subscribe();
        Self {
            provider,
            key_attribute: key_attribute.into(),
            upstream,
        }
    }

    pub fn provider(&self) -> &ScriptProvider {
        &self.provider
    }

    /// Run every step in order.
    ///
    /// # Errors
    /// Stops at the first failing step.
    pub async fn run(&mut self, steps: &[ScriptStep]) -> Result<ScriptReport, ProviderError> {
        let mut report = ScriptReport::default();
        for (index, step) in steps.iter().enumerate() {
            tracing::debug!(index, ?step, "script step");
            self.apply(step, &mut report).await?;
            self.reconcile().await?;
            report.steps += 1;
        }
        Ok(report)
    }

    /// Submit whatever is still submittable, accepting everything.
    pub async fn submit_all(&mut self) -> Result<ScriptReport, ProviderError> {
        self.run(&[ScriptStep::Submit { reject: Vec::new() }]).await
    }

    async fn apply(
        &mut self,
        step: &ScriptStep,
        report: &mut ScriptReport,
    ) -> Result<(), ProviderError> {
        match step {
            ScriptStep::Add { row } => match self.row_key(row)? {
                Some(key) => self.provider.add_item(Item::new(key, row.clone())),
                None => {
                    let key = self.provider.add_new_item(row.clone())?;
                    tracing::info!(key = %key, "generated key for added row");
                    Ok(())
                }
            },
            ScriptStep::Update { row } => {
                let key = self.row_key(row)?.ok_or_else(|| {
                    ProviderError::Config(format!("update row has no '{}'", self.key_attribute))
                })?;
                self.provider.update_item(Item::new(key, row.clone()))
            }
            ScriptStep::Remove { key } => {
                let mut found = self
                    .provider
                    .fetch_by_keys(FetchByKeysParameters::new(vec![key.clone()]))
                    .await?;
                let item = found.results.remove(key).ok_or(ProviderError::NotFound)?;
                self.provider.remove_item(item)
            }
            ScriptStep::Reset { key: Some(key) } => {
                if !self.provider.reset_unsubmitted_item(key).await? {
                    tracing::warn!(key = %key, "nothing to reset");
                }
                Ok(())
            }
            ScriptStep::Reset { key: None } => self.provider.reset_all_unsubmitted_items(),
            ScriptStep::Submit { reject } => {
                let reject: HashSet<&String> = reject.iter().collect();
                for edit in self.provider.submittable_items()? {
                    self.submit(edit, &reject, report)?;
                }
                Ok(())
            }
        }
    }

    fn submit(
        &self,
        edit: EditItem<String, Value>,
        reject: &HashSet<&String>,
        report: &mut ScriptReport,
    ) -> Result<(), ProviderError> {
        self.provider
            .set_item_status(&edit, EditStatus::Submitting, None, None)?;
        let outcome = if reject.contains(edit.key()) {
            Err(ProviderError::Source("rejected by script".to_string()))
        } else {
            self.provider.source().apply(&edit)
        };
        match outcome {
            Ok(()) => {
                self.provider
                    .set_item_status(&edit, EditStatus::Submitted, None, None)?;
                report.submitted.push(edit);
            }
            Err(err) => {
                tracing::warn!(key = %edit.key(), error = %err, "submission failed");
                self.provider.set_item_status(
                    &edit,
                    EditStatus::Unsubmitted,
                    Some(ItemMessage::error(err.to_string())),
                    None,
                )?;
                report.rejected.push(edit);
            }
        }
        Ok(())
    }

    /// Feed queued source events through the provider.
    async fn reconcile(&mut self) -> Result<(), ProviderError> {
        loop {
            match self.upstream.try_recv() {
                Ok(event) => self.provider.handle_source_event(event).await?,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "source events lagged; treating as refresh");
                    self.provider.handle_source_event(ProviderEvent::Refresh).await?;
                }
                Err(_) => return Ok(()),
            }
        }
    }

    fn row_key(&self, row: &Value) -> Result<Option<String>, ProviderError> {
        match row.get(&self.key_attribute) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(key)) => Ok(Some(key.clone())),
            Some(Value::Number(key)) => Ok(Some(key.to_string())),
            Some(other) => Err(ProviderError::Config(format!(
                "'{}' must be a string or number, got {}",
                self.key_attribute, other
            ))),
        }
    }
}

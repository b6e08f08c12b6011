//! Token usage types.
//!
//! Every count is optional: `None` means the provider did not report it,
//! which is different from a reported zero.

use serde::{Deserialize, Deserializer, Serialize};

/// Token usage for one step or one whole turn.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub input: InputUsage,
    #[serde(default)]
    pub output: OutputUsage,
}

/// Prompt-side token counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InputUsage {
    #[serde(default, deserialize_with = "lenient_count", skip_serializing_if = "Option::is_none")]
    pub no_cache: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count", skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count", skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<u64>,
}

/// Completion-side token counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputUsage {
    #[serde(default, deserialize_with = "lenient_count", skip_serializing_if = "Option::is_none")]
    pub text: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count", skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<u64>,
}

impl Usage {
    /// Whether no field at all was reported.
    pub fn is_empty(&self) -> bool {
        self.model.as_deref().map_or(true, str::is_empty)
            && self.input == InputUsage::default()
            && self.output == OutputUsage::default()
    }

    /// Sum of the reported prompt-side counts, `None` when nothing was reported.
    pub fn total_input(&self) -> Option<u64> {
        sum_reported(&[
            self.input.no_cache,
            self.input.cache_read,
            self.input.cache_write,
        ])
    }

    /// Sum of the reported completion-side counts, `None` when nothing was reported.
    pub fn total_output(&self) -> Option<u64> {
        sum_reported(&[self.output.text, self.output.reasoning])
    }

    /// Last-write-wins merge: every field `other` reports replaces ours.
    pub fn overlay(&mut self, other: &Usage) {
        if let Some(model) = other.model.as_deref().filter(|m| !m.is_empty()) {
            self.model = Some(model.to_string());
        }
        overwrite(&mut self.input.no_cache, other.input.no_cache);
        overwrite(&mut self.input.cache_read, other.input.cache_read);
        overwrite(&mut self.input.cache_write, other.input.cache_write);
        overwrite(&mut self.output.text, other.output.text);
        overwrite(&mut self.output.reasoning, other.output.reasoning);
    }

    /// Accumulate another step's usage into this running total.
    pub fn accumulate(&mut self, other: &Usage) {
        if let Some(model) = other.model.as_deref().filter(|m| !m.is_empty()) {
            self.model = Some(model.to_string());
        }
        add(&mut self.input.no_cache, other.input.no_cache);
        add(&mut self.input.cache_read, other.input.cache_read);
        add(&mut self.input.cache_write, other.input.cache_write);
        add(&mut self.output.text, other.output.text);
        add(&mut self.output.reasoning, other.output.reasoning);
    }
}

fn sum_reported(values: &[Option<u64>]) -> Option<u64> {
    values
        .iter()
        .flatten()
        .fold(None, |acc, v| Some(acc.unwrap_or(0) + v))
}

fn overwrite(slot: &mut Option<u64>, value: Option<u64>) {
    if value.is_some() {
        *slot = value;
    }
}

fn add(slot: &mut Option<u64>, value: Option<u64>) {
    if let Some(v) = value {
        *slot = Some(slot.unwrap_or(0).saturating_add(v));
    }
}

/// Deserialize a token count, mapping anything that is not a usable
/// non-negative number (NaN, negatives, infinities, junk strings) to zero.
/// `null` stays "not reported".
pub(crate) fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| count_from_value(&v)))
}

pub(crate) fn count_from_value(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Number(n) => Some(match n.as_u64() {
            Some(v) => v,
            None => n
                .as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
                .unwrap_or(0),
        }),
        serde_json::Value::String(s) => Some(
            s.trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
                .unwrap_or(0),
        ),
        _ => Some(0),
    }
}

//! Addressed batches and the builder that expands samples into them
//!
//! ```text
//! samples [cpu, cpu, disk]          destination "metering", fan-out on
//!              │
//!              ▼
//! metering       [cpu, cpu, disk]   ← always first, input order
//! metering.cpu   [cpu, cpu]         ← one per category, ascending
//! metering.disk  [disk]
//! ```

use crate::sample::{Context, MeterRecord, Sample, SampleSerializer};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One addressed, ordered group of serialized samples awaiting delivery
///
/// Immutable once built: a batch is either sent or dropped, never edited.
#[derive(Debug, Clone)]
pub struct Batch {
    destination: String,
    context: Arc<Context>,
    payload: Vec<MeterRecord>,
}

impl Batch {
    pub fn new(destination: impl Into<String>, context: Arc<Context>, payload: Vec<MeterRecord>) -> Self {
        Self {
            destination: destination.into(),
            context,
            payload,
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn payload(&self) -> &[MeterRecord] {
        &self.payload
    }

    /// Number of samples carried
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Expands a sample set into addressed batches
pub struct BatchBuilder {
    destination: String,
    per_category_fanout: bool,
    serializer: Arc<dyn SampleSerializer>,
}

impl BatchBuilder {
    pub fn new(
        destination: impl Into<String>,
        per_category_fanout: bool,
        serializer: Arc<dyn SampleSerializer>,
    ) -> Self {
        Self {
            destination: destination.into(),
            per_category_fanout,
            serializer,
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn per_category_fanout(&self) -> bool {
        self.per_category_fanout
    }

    /// Build batches for one publish call.
    ///
    /// The first batch carries every sample at the base destination. With fan-out
    /// enabled, one batch per category follows, addressed `<destination>.<category>`.
    /// Each sample is serialized exactly once.
    pub fn build(&self, context: &Context, samples: &[Sample]) -> Vec<Batch> {
        let context = Arc::new(context.clone());
        let records: Vec<MeterRecord> = samples
            .iter()
            .map(|sample| self.serializer.serialize(sample))
            .collect();

        let mut per_category: BTreeMap<String, Vec<MeterRecord>> = BTreeMap::new();
        if self.per_category_fanout {
            for record in &records {
                per_category
                    .entry(record.category().to_string())
                    .or_default()
                    .push(record.clone());
            }
        }

        let mut batches = Vec::with_capacity(1 + per_category.len());
        batches.push(Batch::new(self.destination.clone(), Arc::clone(&context), records));

        for (category, records) in per_category {
            let destination = format!("{}.{}", self.destination, category);
            tracing::debug!(
                samples = records.len(),
                destination = %destination,
                "publishing samples on category destination"
            );
            batches.push(Batch::new(destination, Arc::clone(&context), records));
        }

        batches
    }
}

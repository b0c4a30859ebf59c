//! Synthetic records for declared entities.
//!
//! Generation runs in two phases: identifiers are allocated for every
//! resource first, then fields are filled, so foreign keys are always drawn
//! from ids that exist. Reconciliation after a schema edit touches only the
//! fields whose definition changed and never rewrites a record's id.

pub mod values;

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::tree::{Entity, ID_FIELD, ValidationReport};

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MockDataSet(pub BTreeMap<String, Vec<Record>>);

impl MockDataSet {
    pub fn get(&self, resource: &str) -> Option<&Vec<Record>> {
        self.0.get(resource)
    }

    pub fn insert(&mut self, resource: &str, records: Vec<Record>) {
        self.0.insert(resource.to_string(), records);
    }

    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    fn ids(&self, resource: &str) -> Vec<Value> {
        self.0
            .get(resource)
            .map(|records| {
                records
                    .iter()
                    .filter_map(|r| r.get(ID_FIELD).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthOptions {
    pub min_records: usize,
    pub max_records: usize,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            min_records: 5,
            max_records: 10,
        }
    }
}

/// What reconciliation did, reported in the pipeline's state event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub generated: Vec<String>,
    pub dropped: Vec<String>,
    pub backfilled: Vec<String>,
    pub stripped: Vec<String>,
    pub repaired_values: usize,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        !self.generated.is_empty()
            || !self.dropped.is_empty()
            || !self.backfilled.is_empty()
            || !self.stripped.is_empty()
            || self.repaired_values > 0
    }
}

pub struct Synthesizer {
    options: SynthOptions,
    rng: StdRng,
}

impl Synthesizer {
    pub fn new(options: SynthOptions, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { options, rng }
    }

    fn record_target(&mut self) -> usize {
        let min = self.options.min_records.max(1);
        let max = self.options.max_records.max(min);
        self.rng.gen_range(min..=max)
    }

    fn allocate(&mut self) -> Vec<Record> {
        (1..=self.record_target())
            .map(|id| {
                let mut record = Record::new();
                record.insert(ID_FIELD.to_string(), Value::from(id as u64));
                record
            })
            .collect()
    }

    fn fill_field(
        &mut self,
        entity: &Entity,
        field_name: &str,
        record: &mut Record,
        index: usize,
        pools: &HashMap<String, Vec<Value>>,
    ) {
        let Some(field) = entity.field(field_name) else {
            return;
        };
        let value = match entity.foreign_target(field_name) {
            Some(target) => pools
                .get(target)
                .and_then(|ids| ids.choose(&mut self.rng).cloned())
                .unwrap_or(Value::Null),
            None => values::generate(&mut self.rng, &entity.name, field, index),
        };
        record.insert(field.name.clone(), value);
    }

    /// Fresh records for every entity.
    pub fn generate(&mut self, entities: &[Entity]) -> MockDataSet {
        let mut data = MockDataSet::default();
        for entity in entities {
            let shells = self.allocate();
            data.insert(&entity.name, shells);
        }
        let pools = id_pools(entities, &data);
        for entity in entities {
            self.fill_all(entity, &mut data, &pools);
        }
        data
    }

    fn fill_all(&mut self, entity: &Entity, data: &mut MockDataSet, pools: &HashMap<String, Vec<Value>>) {
        let names: Vec<String> = entity.data_fields().map(|f| f.name.clone()).collect();
        let mut records = data.0.remove(&entity.name).unwrap_or_default();
        for (index, record) in records.iter_mut().enumerate() {
            for name in &names {
                self.fill_field(entity, name, record, index, pools);
            }
        }
        data.insert(&entity.name, records);
    }

    /// Bring `existing` in line with the `after` schema.
    ///
    /// Added fields are backfilled, removed fields stripped, values that no
    /// longer conform (changed type, dropped select option, dangling foreign
    /// key) are repaired one at a time. New entities get fresh records;
    /// removed entities are dropped. Resources named in `regenerate` are
    /// replaced wholesale.
    pub fn reconcile(
        &mut self,
        before: &[Entity],
        after: &[Entity],
        existing: &MockDataSet,
        regenerate: &[String],
    ) -> (MockDataSet, ReconcileReport) {
        let mut report = ReconcileReport::default();
        let mut data = MockDataSet::default();
        let mut fresh: HashSet<String> = HashSet::new();

        for resource in existing.resources() {
            if !after.iter().any(|e| e.name == resource) {
                report.dropped.push(resource.to_string());
            }
        }

        for entity in after {
            let known = before.iter().any(|e| e.name == entity.name);
            match existing.get(&entity.name) {
                Some(records) if known && !regenerate.contains(&entity.name) => {
                    data.insert(&entity.name, records.clone());
                }
                _ => {
                    let shells = self.allocate();
                    data.insert(&entity.name, shells);
                    fresh.insert(entity.name.clone());
                    report.generated.push(entity.name.clone());
                }
            }
        }

        let pools = id_pools(after, &data);

        for entity in after {
            if fresh.contains(&entity.name) {
                self.fill_all(entity, &mut data, &pools);
                continue;
            }
            let previous = before.iter().find(|e| e.name == entity.name);
            let mut records = data.0.remove(&entity.name).unwrap_or_default();

            let declared: HashSet<&str> = entity.fields.iter().map(|f| f.name.as_str()).collect();
            let mut stripped: HashSet<String> = HashSet::new();
            for record in records.iter_mut() {
                record.retain(|k, _| {
                    let keep = k == ID_FIELD || declared.contains(k.as_str());
                    if !keep {
                        stripped.insert(k.clone());
                    }
                    keep
                });
            }
            let mut stripped: Vec<String> = stripped.into_iter().collect();
            stripped.sort();
            report
                .stripped
                .extend(stripped.into_iter().map(|f| format!("{}.{}", entity.name, f)));

            for field in entity.data_fields() {
                let is_new = previous.is_none_or(|p| p.field(&field.name).is_none());
                let fk_pool = entity
                    .foreign_target(&field.name)
                    .and_then(|t| pools.get(t));
                for (index, record) in records.iter_mut().enumerate() {
                    let current = record.get(&field.name).cloned().unwrap_or(Value::Null);
                    let valid = match fk_pool {
                        Some(ids) => ids.contains(&current) || (current.is_null() && !field.required),
                        None => values::conforms(field, &current),
                    };
                    let present = record.contains_key(&field.name);
                    if is_new || !present || !valid {
                        if !is_new {
                            report.repaired_values += 1;
                        }
                        self.fill_field(entity, &field.name, record, index, &pools);
                    }
                }
                if is_new && !records.is_empty() {
                    report.backfilled.push(format!("{}.{}", entity.name, field.name));
                }
            }
            data.insert(&entity.name, records);
        }

        (data, report)
    }
}

fn id_pools(entities: &[Entity], data: &MockDataSet) -> HashMap<String, Vec<Value>> {
    entities
        .iter()
        .map(|e| (e.name.clone(), data.ids(&e.name)))
        .collect()
}

/// Referential and per-field integrity of a data set against its entities.
pub fn check_integrity(entities: &[Entity], data: &MockDataSet) -> Result<(), ValidationReport> {
    let mut report = ValidationReport::default();
    let pools = id_pools(entities, data);

    for resource in data.resources() {
        if !entities.iter().any(|e| e.name == resource) {
            report.push(format!("mockData.{}", resource), "resource has no declared entity");
        }
    }

    for entity in entities {
        let base = format!("mockData.{}", entity.name);
        let Some(records) = data.get(&entity.name) else {
            report.push(&base, "missing records");
            continue;
        };
        let mut seen = HashSet::new();
        for (i, record) in records.iter().enumerate() {
            let rpath = format!("{}[{}]", base, i);
            match record.get(ID_FIELD) {
                Some(id) if !id.is_null() => {
                    if !seen.insert(id.to_string()) {
                        report.push(&rpath, format!("duplicate id {}", id));
                    }
                }
                _ => report.push(&rpath, "missing id"),
            }
            for field in entity.data_fields() {
                let value = record.get(&field.name).unwrap_or(&Value::Null);
                let ok = match entity.foreign_target(&field.name) {
                    Some(target) => {
                        pools.get(target).is_some_and(|ids| ids.contains(value))
                            || (value.is_null() && !field.required)
                    }
                    None => values::conforms(field, value),
                };
                if !ok {
                    report.push(&rpath, format!("invalid value {} for '{}'", value, field.name));
                }
            }
        }
    }
    report.into_result()
}

use crate::core::{Aggregator, Dependent, Feed, FeedHandle, Sample};
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// A value that can absorb another value of the same type.
///
/// Shard results travel to the coordinator as JSON.
pub trait Addable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn add(&mut self, other: &Self);
}

macro_rules! impl_addable_for_number {
    ($($t:ty),*) => {
        $(
            impl Addable for $t {
                fn add(&mut self, other: &Self) {
                    *self += *other;
                }
            }
        )*
    };
}

impl_addable_for_number!(i32, i64, u32, u64, usize, f32, f64);

impl<T> Addable for Vec<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn add(&mut self, other: &Self) {
        self.extend(other.iter().cloned());
    }
}

impl<V: Addable> Addable for BTreeMap<String, V> {
    fn add(&mut self, other: &Self) {
        for (k, v) in other {
            match self.get_mut(k) {
                Some(existing) => existing.add(v),
                None => {
                    self.insert(k.clone(), v.clone());
                }
            }
        }
    }
}

impl<K, V> Addable for HashMap<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Addable,
{
    fn add(&mut self, other: &Self) {
        for (k, v) in other {
            match self.get_mut(k) {
                Some(existing) => existing.add(v),
                None => {
                    self.insert(k.clone(), v.clone());
                }
            }
        }
    }
}

pub type NewFn<T> = Arc<dyn Fn() -> T + Send + Sync>;
pub type ConvertFn<T> = Arc<dyn Fn(&Sample) -> T + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn typed<'a, T: Addable>(name: &str, sample: &'a Sample) -> Result<&'a T> {
    sample
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow!("{}: result has an unexpected type", name))
}

fn encode<T: Addable>(name: &str, sample: &Sample) -> Result<Vec<u8>> {
    serde_json::to_vec(typed::<T>(name, sample)?)
        .with_context(|| format!("{}: failed to serialize result", name))
}

fn decode<T: Addable>(name: &str, data: &[u8]) -> Result<Sample> {
    let value: T = serde_json::from_slice(data)
        .with_context(|| format!("{}: failed to deserialize shard result", name))?;
    Ok(Sample::new(value))
}

fn fold<T: Addable>(name: &str, agg: Option<Sample>, shard_sample: Sample) -> Result<Sample> {
    let Some(agg) = agg else {
        return Ok(shard_sample);
    };
    let mut total = typed::<T>(name, &agg)?.clone();
    total.add(typed::<T>(name, &shard_sample)?);
    Ok(Sample::new(total))
}

/// Sums `Addable` values converted from its inputs.
///
/// Each worker clone accumulates privately; the shard merges the clones in
/// `aggregate_local`.
pub struct SumAggregator<T: Addable> {
    name: String,
    new_fn: NewFn<T>,
    convert: ConvertFn<T>,
    acc: Mutex<T>,
}

impl<T: Addable> SumAggregator<T> {
    pub fn new<N, C>(name: impl Into<String>, new_fn: N, convert: C) -> Self
    where
        N: Fn() -> T + Send + Sync + 'static,
        C: Fn(&Sample) -> T + Send + Sync + 'static,
    {
        let new_fn: NewFn<T> = Arc::new(new_fn);
        Self {
            name: name.into(),
            acc: Mutex::new(new_fn()),
            new_fn,
            convert: Arc::new(convert),
        }
    }

    fn fresh(&self) -> Self {
        Self {
            name: self.name.clone(),
            new_fn: self.new_fn.clone(),
            convert: self.convert.clone(),
            acc: Mutex::new((self.new_fn)()),
        }
    }

    /// Snapshot of this instance's accumulator
    pub fn current(&self) -> T {
        lock(&self.acc).clone()
    }
}

impl<T: Addable> Feed for SumAggregator<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Addable> Dependent for SumAggregator<T> {
    fn clone_dependent(&self) -> Option<FeedHandle> {
        Some(FeedHandle::Aggregator(Arc::new(self.fresh())))
    }

    fn input(&self, sample: Sample) {
        let value = (self.convert)(&sample);
        lock(&self.acc).add(&value);
    }
}

impl<T: Addable> Aggregator for SumAggregator<T> {
    fn for_shard(&self, _shard: usize, _total_shards: usize) -> Result<Arc<dyn Aggregator>> {
        Ok(Arc::new(self.fresh()))
    }

    fn aggregate_local(&self, clones: &[Arc<dyn Aggregator>]) -> Result<Sample> {
        let mut total = (self.new_fn)();
        for clone in clones {
            let clone = clone
                .as_any()
                .downcast_ref::<Self>()
                .ok_or_else(|| anyhow!("{}: worker clone is not a SumAggregator", self.name))?;
            total.add(&lock(&clone.acc));
        }
        Ok(Sample::new(total))
    }

    fn to_json(&self, sample: &Sample) -> Result<Vec<u8>> {
        encode::<T>(&self.name, sample)
    }

    fn from_json(&self, data: &[u8]) -> Result<Sample> {
        decode::<T>(&self.name, data)
    }

    fn aggregate_from_shard(
        &self,
        agg: Option<Sample>,
        shard_sample: Sample,
        _endpoint: &str,
    ) -> Result<Sample> {
        fold::<T>(&self.name, agg, shard_sample)
    }
}

/// `SumAggregator` variant whose worker clones all add into one
/// mutex-guarded accumulator per shard.
pub struct SharedSumAggregator<T: Addable> {
    name: String,
    new_fn: NewFn<T>,
    convert: ConvertFn<T>,
    acc: Arc<Mutex<T>>,
}

impl<T: Addable> SharedSumAggregator<T> {
    pub fn new<N, C>(name: impl Into<String>, new_fn: N, convert: C) -> Self
    where
        N: Fn() -> T + Send + Sync + 'static,
        C: Fn(&Sample) -> T + Send + Sync + 'static,
    {
        let new_fn: NewFn<T> = Arc::new(new_fn);
        Self {
            name: name.into(),
            acc: Arc::new(Mutex::new(new_fn())),
            new_fn,
            convert: Arc::new(convert),
        }
    }

    fn sharing(&self, acc: Arc<Mutex<T>>) -> Self {
        Self {
            name: self.name.clone(),
            new_fn: self.new_fn.clone(),
            convert: self.convert.clone(),
            acc,
        }
    }
}

impl<T: Addable> Feed for SharedSumAggregator<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Addable> Dependent for SharedSumAggregator<T> {
    fn clone_dependent(&self) -> Option<FeedHandle> {
        Some(FeedHandle::Aggregator(Arc::new(
            self.sharing(self.acc.clone()),
        )))
    }

    fn input(&self, sample: Sample) {
        let value = (self.convert)(&sample);
        lock(&self.acc).add(&value);
    }
}

impl<T: Addable> Aggregator for SharedSumAggregator<T> {
    fn for_shard(&self, _shard: usize, _total_shards: usize) -> Result<Arc<dyn Aggregator>> {
        Ok(Arc::new(self.sharing(Arc::new(Mutex::new((self.new_fn)())))))
    }

    fn aggregate_local(&self, _clones: &[Arc<dyn Aggregator>]) -> Result<Sample> {
        // every clone wrote into our accumulator
        Ok(Sample::new(lock(&self.acc).clone()))
    }

    fn to_json(&self, sample: &Sample) -> Result<Vec<u8>> {
        encode::<T>(&self.name, sample)
    }

    fn from_json(&self, data: &[u8]) -> Result<Sample> {
        decode::<T>(&self.name, data)
    }

    fn aggregate_from_shard(
        &self,
        agg: Option<Sample>,
        shard_sample: Sample,
        _endpoint: &str,
    ) -> Result<Sample> {
        fold::<T>(&self.name, agg, shard_sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_sum(name: &str) -> SumAggregator<i64> {
        SumAggregator::new(name, || 0i64, |s| *s.downcast_ref::<i64>().unwrap())
    }

    #[test]
    fn test_local_aggregation_merges_clones() {
        let agg = int_sum("sum");
        let shard = agg.for_shard(0, 1).unwrap();

        let clones: Vec<Arc<dyn Aggregator>> = (0..3)
            .map(|i| {
                let handle = shard.clone_dependent().unwrap();
                let clone = handle.as_aggregator().unwrap().clone();
                clone.input(Sample::new(i as i64 + 1));
                clone
            })
            .collect();

        let total = shard.aggregate_local(&clones).unwrap();
        assert_eq!(total.downcast_ref::<i64>(), Some(&6));
    }

    #[test]
    fn test_json_round_trip_through_fold() {
        let agg = int_sum("sum");
        let local = Sample::new(12i64);

        let bytes = agg.to_json(&local).unwrap();
        let decoded = agg.from_json(&bytes).unwrap();
        let folded = agg.aggregate_from_shard(None, decoded, "http://shard-0").unwrap();
        assert_eq!(folded.downcast_ref::<i64>(), Some(&12));

        let again = agg
            .aggregate_from_shard(Some(folded), Sample::new(3i64), "http://shard-1")
            .unwrap();
        assert_eq!(again.downcast_ref::<i64>(), Some(&15));
    }

    #[test]
    fn test_map_addable() {
        let mut a: BTreeMap<String, u64> = BTreeMap::from([("x".to_string(), 1)]);
        let b = BTreeMap::from([("x".to_string(), 2), ("y".to_string(), 5)]);
        a.add(&b);
        assert_eq!(a["x"], 3);
        assert_eq!(a["y"], 5);
    }

    #[test]
    fn test_shared_clones_use_one_accumulator() {
        let agg = SharedSumAggregator::new("shared", || 0u64, |s| *s.downcast_ref::<u64>().unwrap());
        let shard = agg.for_shard(0, 1).unwrap();

        let a = shard.clone_dependent().unwrap();
        let b = shard.clone_dependent().unwrap();
        a.input(Sample::new(2u64));
        b.input(Sample::new(5u64));

        let total = shard.aggregate_local(&[]).unwrap();
        assert_eq!(total.downcast_ref::<u64>(), Some(&7));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let agg = int_sum("sum");
        assert!(agg.from_json(b"not json").is_err());
    }
}

//! Incremental accumulate functions
//!
//! Each accumulator remembers the value every contributing fact added, so a
//! retraction subtracts exactly what the insertion added without re-reading the
//! fact (which may already carry new field values during an update).
//!
//! | function       | state                          | per change |
//! |----------------|--------------------------------|------------|
//! | count          | contributor map                | O(log n)   |
//! | sum, average   | running i128 + f64 totals      | O(1)       |
//! | min, max, set  | ordered multiset (`BTreeMap`)  | O(log n)   |
//! | collect_list   | contributor map (handle order) | O(log n)   |
//!
//! `min`, `max` and `average` of an empty set produce no result, so the
//! accumulate does not propagate; `count`, `sum` and the collections produce
//! `0` or an empty array.

use crate::rule::AccumulateFunction;
use crate::types::FactHandle;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tally_types::FactValue;

/// `FactValue` ordered by its total ordering, for ordered collections
#[derive(Debug, Clone)]
pub struct OrderedValue(pub FactValue);

impl PartialEq for OrderedValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedValue {}

impl PartialOrd for OrderedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Running state of one accumulate function for one partial match
#[derive(Debug, Clone)]
pub struct AccumulatorState {
    function: AccumulateFunction,
    contributions: BTreeMap<FactHandle, FactValue>,
    int_sum: i128,
    float_sum: f64,
    float_terms: usize,
    numeric_terms: usize,
    ordered: BTreeMap<OrderedValue, usize>,
}

impl AccumulatorState {
    pub fn new(function: AccumulateFunction) -> Self {
        Self {
            function,
            contributions: BTreeMap::new(),
            int_sum: 0,
            float_sum: 0.0,
            float_terms: 0,
            numeric_terms: 0,
            ordered: BTreeMap::new(),
        }
    }

    /// Full re-scan over `(handle, value)` pairs
    pub fn from_values<I>(function: AccumulateFunction, values: I) -> Self
    where
        I: IntoIterator<Item = (FactHandle, FactValue)>,
    {
        let mut state = Self::new(function);
        for (handle, value) in values {
            state.add(handle, value);
        }
        state
    }

    pub fn function(&self) -> &AccumulateFunction {
        &self.function
    }

    /// Add a contributor; re-adding a handle replaces its previous value
    pub fn add(&mut self, handle: FactHandle, value: FactValue) {
        self.remove(handle);
        self.apply(&value, 1);
        self.contributions.insert(handle, value);
    }

    /// Remove a contributor, returning whether it was present
    pub fn remove(&mut self, handle: FactHandle) -> bool {
        match self.contributions.remove(&handle) {
            Some(value) => {
                self.apply(&value, -1);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, value: &FactValue, sign: i8) {
        match self.function {
            AccumulateFunction::Sum(_) | AccumulateFunction::Average(_) => match value {
                FactValue::Integer(i) => {
                    self.int_sum += i128::from(*i) * i128::from(sign);
                    self.adjust_numeric_terms(sign);
                }
                FactValue::Float(f) => {
                    self.float_sum += f * f64::from(sign);
                    self.adjust_numeric_terms(sign);
                    if sign > 0 {
                        self.float_terms += 1;
                    } else {
                        self.float_terms = self.float_terms.saturating_sub(1);
                        if self.float_terms == 0 {
                            self.float_sum = 0.0;
                        }
                    }
                }
                _ => {}
            },
            AccumulateFunction::Min(_) | AccumulateFunction::Max(_) | AccumulateFunction::CollectSet(_) => {
                if value.is_null() {
                    return;
                }
                let key = OrderedValue(value.clone());
                if sign > 0 {
                    *self.ordered.entry(key).or_insert(0) += 1;
                } else if let Some(count) = self.ordered.get_mut(&key) {
                    *count -= 1;
                    if *count == 0 {
                        self.ordered.remove(&key);
                    }
                }
            }
            AccumulateFunction::Count | AccumulateFunction::CollectList(_) => {}
        }
    }

    fn adjust_numeric_terms(&mut self, sign: i8) {
        if sign > 0 {
            self.numeric_terms += 1;
        } else {
            self.numeric_terms = self.numeric_terms.saturating_sub(1);
        }
    }

    pub fn contributors(&self) -> impl Iterator<Item = FactHandle> + '_ {
        self.contributions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.contributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    /// Current result, `None` when the function is undefined for the current set
    #[allow(clippy::cast_precision_loss)]
    pub fn result(&self) -> Option<FactValue> {
        match &self.function {
            AccumulateFunction::Count => {
                Some(FactValue::Integer(i64::try_from(self.contributions.len()).unwrap_or(i64::MAX)))
            }
            AccumulateFunction::Sum(_) => Some(self.total()),
            AccumulateFunction::Average(_) => {
                if self.numeric_terms == 0 {
                    return None;
                }
                let total = self.int_sum as f64 + self.float_sum;
                Some(FactValue::Float(total / self.numeric_terms as f64))
            }
            AccumulateFunction::Min(_) => self.ordered.first_key_value().map(|(k, _)| k.0.clone()),
            AccumulateFunction::Max(_) => self.ordered.last_key_value().map(|(k, _)| k.0.clone()),
            AccumulateFunction::CollectSet(_) => {
                Some(FactValue::Array(self.ordered.keys().map(|k| k.0.clone()).collect()))
            }
            AccumulateFunction::CollectList(_) => Some(FactValue::Array(
                self.contributions.values().filter(|v| !v.is_null()).cloned().collect(),
            )),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn total(&self) -> FactValue {
        if self.float_terms == 0 {
            let clamped = self.int_sum.clamp(i128::from(i64::MIN), i128::from(i64::MAX));
            FactValue::Integer(i64::try_from(clamped).unwrap_or_default())
        } else {
            FactValue::Float(self.int_sum as f64 + self.float_sum)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn field() -> String {
        "amount".to_string()
    }

    #[test]
    fn test_min_max_survive_removal_of_extremes() {
        let mut min = AccumulatorState::new(AccumulateFunction::Min(field()));
        let mut max = AccumulatorState::new(AccumulateFunction::Max(field()));
        for (h, v) in [(1, 5), (2, 1), (3, 9), (4, 1)] {
            min.add(FactHandle(h), v.into());
            max.add(FactHandle(h), v.into());
        }
        assert_eq!(min.result(), Some(FactValue::Integer(1)));
        min.remove(FactHandle(2));
        assert_eq!(min.result(), Some(FactValue::Integer(1)));
        min.remove(FactHandle(4));
        assert_eq!(min.result(), Some(FactValue::Integer(5)));

        max.remove(FactHandle(3));
        assert_eq!(max.result(), Some(FactValue::Integer(5)));
        for h in [1, 2, 4] {
            max.remove(FactHandle(h));
        }
        assert_eq!(max.result(), None);
    }

    #[test]
    fn test_sum_switches_to_float_and_back() {
        let mut sum = AccumulatorState::new(AccumulateFunction::Sum(field()));
        sum.add(FactHandle(1), 2.into());
        sum.add(FactHandle(2), 0.5.into());
        assert_eq!(sum.result(), Some(FactValue::Float(2.5)));
        sum.remove(FactHandle(2));
        assert_eq!(sum.result(), Some(FactValue::Integer(2)));
    }

    #[test]
    fn test_average_and_collections() {
        let values = [(1, 2), (2, 4), (3, 4)].map(|(h, v)| (FactHandle(h), FactValue::Integer(v)));
        let avg = AccumulatorState::from_values(AccumulateFunction::Average(field()), values.clone());
        assert_eq!(avg.result(), Some(FactValue::Float(10.0 / 3.0)));
        let set = AccumulatorState::from_values(AccumulateFunction::CollectSet(field()), values.clone());
        assert_eq!(set.result(), Some(FactValue::Array(vec![2.into(), 4.into()])));
        let list = AccumulatorState::from_values(AccumulateFunction::CollectList(field()), values);
        assert_eq!(list.result(), Some(FactValue::Array(vec![2.into(), 4.into(), 4.into()])));
        assert_eq!(AccumulatorState::new(AccumulateFunction::Average(field())).result(), None);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Add(u64, i64),
        Remove(u64),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u64..8, -1000i64..1000).prop_map(|(h, v)| Step::Add(h, v)),
            (0u64..8).prop_map(Step::Remove),
        ]
    }

    proptest! {
        #[test]
        fn incremental_state_matches_rescan(steps in proptest::collection::vec(step(), 1..60)) {
            let functions = [
                AccumulateFunction::Count,
                AccumulateFunction::Sum(field()),
                AccumulateFunction::Average(field()),
                AccumulateFunction::Min(field()),
                AccumulateFunction::Max(field()),
                AccumulateFunction::CollectSet(field()),
                AccumulateFunction::CollectList(field()),
            ];
            for function in functions {
                let mut state = AccumulatorState::new(function.clone());
                let mut live: BTreeMap<u64, i64> = BTreeMap::new();
                for step in &steps {
                    match step {
                        Step::Add(h, v) => {
                            state.add(FactHandle(*h), (*v).into());
                            live.insert(*h, *v);
                        }
                        Step::Remove(h) => {
                            state.remove(FactHandle(*h));
                            live.remove(h);
                        }
                    }
                    let rescan = AccumulatorState::from_values(
                        function.clone(),
                        live.iter().map(|(h, v)| (FactHandle(*h), FactValue::Integer(*v))),
                    );
                    prop_assert_eq!(state.result(), rescan.result());
                }
            }
        }
    }
}

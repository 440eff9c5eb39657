//! Counters: integers every replica may bump concurrently. Increments
//! commute, so there's nothing to gate - just add.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::crdt::root::DataSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterValue {
    Int(i32),
    Long(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdtCounter {
    value: CounterValue,
}

impl CrdtCounter {
    pub fn new(value: CounterValue) -> Self {
        CrdtCounter { value }
    }

    pub fn value(&self) -> CounterValue {
        self.value
    }

    /// Int counters wrap on overflow rather than widening; the wire format
    /// fixes their width at creation.
    pub fn increase(&mut self, by: i64) {
        self.value = match self.value {
            CounterValue::Int(v) => CounterValue::Int(v.wrapping_add(by as i32)),
            CounterValue::Long(v) => CounterValue::Long(v.wrapping_add(by)),
        };
    }

    pub fn to_json(&self) -> Json {
        match self.value {
            CounterValue::Int(v) => Json::from(v),
            CounterValue::Long(v) => Json::from(v),
        }
    }

    pub fn data_size(&self) -> DataSize {
        let data = match self.value {
            CounterValue::Int(_) => 4,
            CounterValue::Long(_) => 8,
        };
        DataSize { data, meta: 0 }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn increase_wraps() {
        let mut c = CrdtCounter::new(CounterValue::Int(i32::MAX));
        c.increase(1);
        assert_eq!(c.value(), CounterValue::Int(i32::MIN));

        let mut c = CrdtCounter::new(CounterValue::Long(10));
        c.increase(-3);
        assert_eq!(c.value(), CounterValue::Long(7));
    }
}

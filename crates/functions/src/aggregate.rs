//! Aggregate function bodies. The adapter in `bind` has already applied
//! DISTINCT and IGNORE NULLS by the time `step` runs; order-sensitive
//! aggregates record the per-row ORDER BY keys and sort at `done`.

use std::cmp::Ordering;

use skiffql_common::Result;
use skiffql_core::Value;

use crate::bind::AggBody;
use crate::options::CallOptions;
use crate::scalar::ops;

pub fn sort_by_keys<T>(items: &mut [(Vec<(Value, bool)>, T)]) {
    items.sort_by(|(a, _), (b, _)| {
        for ((av, asc), (bv, _)) in a.iter().zip(b.iter()) {
            let ord = av.compare(bv).unwrap_or(Ordering::Equal);
            let ord = if *asc { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[derive(Default)]
pub struct Sum {
    acc: Option<Value>,
}

impl AggBody for Sum {
    fn step(&mut self, args: Vec<Value>, _opts: &CallOptions) -> Result<()> {
        let v = args.into_iter().next().unwrap_or(Value::Null);
        if v.is_null() {
            return Ok(());
        }
        self.acc = Some(match self.acc.take() {
            None => v,
            Some(total) => ops::add(&[total, v])?,
        });
        Ok(())
    }

    fn done(&mut self) -> Result<Value> {
        Ok(self.acc.take().unwrap_or(Value::Null))
    }
}

#[derive(Default)]
pub struct Avg {
    sum: Option<Value>,
    count: i64,
}

impl AggBody for Avg {
    fn step(&mut self, args: Vec<Value>, _opts: &CallOptions) -> Result<()> {
        let v = args.into_iter().next().unwrap_or(Value::Null);
        if v.is_null() {
            return Ok(());
        }
        self.sum = Some(match self.sum.take() {
            None => v,
            Some(total) => ops::add(&[total, v])?,
        });
        self.count += 1;
        Ok(())
    }

    fn done(&mut self) -> Result<Value> {
        match self.sum.take() {
            None => Ok(Value::Null),
            Some(total) => {
                let out = match &total {
                    Value::Numeric(_) | Value::BigNumeric(_) => {
                        ops::div_inner(&total, &Value::Int64(self.count), "AVG")?
                    }
                    _ => Value::float64(total.to_float64()? / self.count as f64),
                };
                Ok(out)
            }
        }
    }
}

#[derive(Default)]
pub struct Count {
    n: i64,
}

impl AggBody for Count {
    fn step(&mut self, args: Vec<Value>, _opts: &CallOptions) -> Result<()> {
        // zero arguments is COUNT(*)
        match args.first() {
            Some(v) if v.is_null() => {}
            _ => self.n += 1,
        }
        Ok(())
    }

    fn done(&mut self) -> Result<Value> {
        Ok(Value::Int64(self.n))
    }
}

#[derive(Default)]
pub struct CountIf {
    n: i64,
}

impl AggBody for CountIf {
    fn step(&mut self, args: Vec<Value>, _opts: &CallOptions) -> Result<()> {
        if let Some(v) = args.first() {
            if !v.is_null() && v.to_bool()? {
                self.n += 1;
            }
        }
        Ok(())
    }

    fn done(&mut self) -> Result<Value> {
        Ok(Value::Int64(self.n))
    }
}

pub struct Extremum {
    best: Option<Value>,
    want_max: bool,
}

impl Extremum {
    pub fn min() -> Box<dyn AggBody> {
        Box::new(Extremum {
            best: None,
            want_max: false,
        })
    }

    pub fn max() -> Box<dyn AggBody> {
        Box::new(Extremum {
            best: None,
            want_max: true,
        })
    }
}

impl AggBody for Extremum {
    fn step(&mut self, args: Vec<Value>, _opts: &CallOptions) -> Result<()> {
        let v = args.into_iter().next().unwrap_or(Value::Null);
        if v.is_null() {
            return Ok(());
        }
        self.best = Some(match self.best.take() {
            None => v,
            Some(cur) => {
                let ord = v.compare(&cur)?;
                if (self.want_max && ord == Ordering::Greater)
                    || (!self.want_max && ord == Ordering::Less)
                {
                    v
                } else {
                    cur
                }
            }
        });
        Ok(())
    }

    fn done(&mut self) -> Result<Value> {
        Ok(self.best.take().unwrap_or(Value::Null))
    }
}

#[derive(Default)]
pub struct StringAgg {
    items: Vec<(Vec<(Value, bool)>, String)>,
    separator: Option<String>,
    limit: Option<i64>,
}

impl AggBody for StringAgg {
    fn step(&mut self, args: Vec<Value>, opts: &CallOptions) -> Result<()> {
        if self.separator.is_none() && args.len() > 1 {
            self.separator = Some(args[1].to_text()?);
        }
        if let Some(n) = opts.limit {
            self.limit = Some(n);
        }
        let v = args.first().cloned().unwrap_or(Value::Null);
        if v.is_null() {
            return Ok(());
        }
        self.items.push((opts.order_by.clone(), v.to_text()?));
        Ok(())
    }

    fn done(&mut self) -> Result<Value> {
        if self.items.is_empty() {
            return Ok(Value::Null);
        }
        sort_by_keys(&mut self.items);
        let take = self.limit.map(|n| n as usize).unwrap_or(self.items.len());
        let sep = self.separator.clone().unwrap_or_else(|| ",".to_string());
        let joined: Vec<&str> = self
            .items
            .iter()
            .take(take)
            .map(|(_, s)| s.as_str())
            .collect();
        Ok(Value::String(joined.join(&sep)))
    }
}

#[derive(Default)]
pub struct ArrayAgg {
    items: Vec<(Vec<(Value, bool)>, Value)>,
    limit: Option<i64>,
}

impl AggBody for ArrayAgg {
    fn step(&mut self, args: Vec<Value>, opts: &CallOptions) -> Result<()> {
        if let Some(n) = opts.limit {
            self.limit = Some(n);
        }
        let v = args.into_iter().next().unwrap_or(Value::Null);
        self.items.push((opts.order_by.clone(), v));
        Ok(())
    }

    fn done(&mut self) -> Result<Value> {
        if self.items.is_empty() {
            return Ok(Value::Null);
        }
        sort_by_keys(&mut self.items);
        let take = self.limit.map(|n| n as usize).unwrap_or(self.items.len());
        Ok(Value::Array(
            self.items.drain(..).take(take).map(|(_, v)| v).collect(),
        ))
    }
}

#[derive(Default)]
pub struct ArrayConcatAgg {
    items: Vec<Value>,
}

impl AggBody for ArrayConcatAgg {
    fn step(&mut self, args: Vec<Value>, _opts: &CallOptions) -> Result<()> {
        let v = args.into_iter().next().unwrap_or(Value::Null);
        if v.is_null() {
            return Ok(());
        }
        self.items.extend(v.to_array()?);
        Ok(())
    }

    fn done(&mut self) -> Result<Value> {
        if self.items.is_empty() {
            return Ok(Value::Null);
        }
        Ok(Value::Array(std::mem::take(&mut self.items)))
    }
}

pub struct BitwiseAgg {
    acc: Option<i64>,
    op: fn(i64, i64) -> i64,
}

impl BitwiseAgg {
    pub fn and() -> Box<dyn AggBody> {
        Box::new(BitwiseAgg { acc: None, op: |a, b| a & b })
    }

    pub fn or() -> Box<dyn AggBody> {
        Box::new(BitwiseAgg { acc: None, op: |a, b| a | b })
    }

    pub fn xor() -> Box<dyn AggBody> {
        Box::new(BitwiseAgg { acc: None, op: |a, b| a ^ b })
    }
}

impl AggBody for BitwiseAgg {
    fn step(&mut self, args: Vec<Value>, _opts: &CallOptions) -> Result<()> {
        let v = args.into_iter().next().unwrap_or(Value::Null);
        if v.is_null() {
            return Ok(());
        }
        let n = v.to_int64()?;
        self.acc = Some(match self.acc {
            None => n,
            Some(acc) => (self.op)(acc, n),
        });
        Ok(())
    }

    fn done(&mut self) -> Result<Value> {
        Ok(self.acc.take().map(Value::Int64).unwrap_or(Value::Null))
    }
}

pub struct LogicalAgg {
    acc: Option<bool>,
    all: bool,
}

impl LogicalAgg {
    pub fn and() -> Box<dyn AggBody> {
        Box::new(LogicalAgg { acc: None, all: true })
    }

    pub fn or() -> Box<dyn AggBody> {
        Box::new(LogicalAgg { acc: None, all: false })
    }
}

impl AggBody for LogicalAgg {
    fn step(&mut self, args: Vec<Value>, _opts: &CallOptions) -> Result<()> {
        let v = args.into_iter().next().unwrap_or(Value::Null);
        if v.is_null() {
            return Ok(());
        }
        let b = v.to_bool()?;
        self.acc = Some(match self.acc {
            None => b,
            Some(acc) => {
                if self.all {
                    acc && b
                } else {
                    acc || b
                }
            }
        });
        Ok(())
    }

    fn done(&mut self) -> Result<Value> {
        Ok(self.acc.take().map(Value::Bool).unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(body: &mut dyn AggBody, values: Vec<Value>) -> Value {
        for v in values {
            body.step(vec![v], &CallOptions::default()).unwrap();
        }
        body.done().unwrap()
    }

    #[test]
    fn sum_skips_nulls_and_keeps_int_type() {
        let mut sum = Sum::default();
        let out = run(&mut sum, vec![Value::Int64(1), Value::Null, Value::Int64(2)]);
        assert_eq!(out, Value::Int64(3));
    }

    #[test]
    fn sum_of_nothing_is_null_and_count_zero() {
        assert_eq!(Sum::default().done().unwrap(), Value::Null);
        assert_eq!(Count::default().done().unwrap(), Value::Int64(0));
    }

    #[test]
    fn string_agg_orders_and_limits() {
        let mut agg = StringAgg::default();
        let rows = [("b", 2i64), ("c", 3), ("a", 1)];
        for (s, k) in rows {
            let opts = CallOptions {
                order_by: vec![(Value::Int64(k), true)],
                limit: Some(2),
                ..CallOptions::default()
            };
            agg.step(vec![Value::from(s), Value::from("|")], &opts).unwrap();
        }
        assert_eq!(agg.done().unwrap(), Value::from("a|b"));
    }

    #[test]
    fn avg_stays_exact_for_decimals() {
        let mut avg = Avg::default();
        let out = run(
            &mut avg,
            vec![Value::numeric_from_i64(1), Value::numeric_from_i64(2)],
        );
        assert_eq!(out.to_text().unwrap(), "1.5");
    }

    #[test]
    fn logical_and_over_bools() {
        let mut agg = LogicalAgg { acc: None, all: true };
        let out = run(&mut agg, vec![Value::Bool(true), Value::Bool(false)]);
        assert_eq!(out, Value::Bool(false));
    }
}

//! Window function bodies. The adapter buffers the whole partition in
//! window order; for each row the frame is materialized from the
//! buffered descriptor and the body evaluated over the in-frame rows.

use std::cmp::Ordering;

use skiffql_common::{Error, Result};
use skiffql_core::Value;

use crate::bind::WinRow;
use crate::options::{FrameBound, FrameSpec, FrameUnits};
use crate::scalar::ops;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    RowNumber,
    Rank,
    DenseRank,
    PercentRank,
    Lag,
    Lead,
    FirstValue,
    LastValue,
    Sum,
    Avg,
    Count,
    Min,
    Max,
    Stddev,
    StddevPop,
    StddevSamp,
    Variance,
    VarPop,
    VarSamp,
    CovarPop,
    CovarSamp,
}

fn keys(row: &WinRow) -> &[(Value, bool)] {
    &row.opts.order_by
}

fn same_keys(a: &WinRow, b: &WinRow) -> bool {
    keys(a).len() == keys(b).len()
        && keys(a)
            .iter()
            .zip(keys(b))
            .all(|((av, _), (bv, _))| av.compare(bv).map(|o| o.is_eq()).unwrap_or(false))
}

/// Materializes the frame for `index` from the row's buffered
/// descriptor. With no explicit frame: ORDER BY present means the
/// default running frame (start through the current row's peers), and
/// no ORDER BY means the whole partition.
pub fn frame_indices(rows: &[WinRow], index: usize) -> Result<Vec<usize>> {
    let row = &rows[index];
    let has_order = !keys(row).is_empty();
    let frame = match &row.opts.window {
        None | Some(None) => {
            if has_order {
                FrameSpec {
                    units: FrameUnits::Range,
                    start: FrameBound::UnboundedPreceding,
                    end: FrameBound::CurrentRow,
                }
            } else {
                return Ok((0..rows.len()).collect());
            }
        }
        Some(Some(spec)) => spec.clone(),
    };
    let (start, end) = match frame.units {
        FrameUnits::Rows => (
            rows_bound(&frame.start, index, rows.len(), true),
            rows_bound(&frame.end, index, rows.len(), false),
        ),
        FrameUnits::Range => (
            range_bound(&frame.start, rows, index, true)?,
            range_bound(&frame.end, rows, index, false)?,
        ),
    };
    if start > end {
        return Ok(Vec::new());
    }
    Ok((start..=end.min(rows.len().saturating_sub(1))).collect())
}

fn rows_bound(bound: &FrameBound, index: usize, len: usize, is_start: bool) -> usize {
    match bound {
        FrameBound::UnboundedPreceding => 0,
        FrameBound::Preceding(n) => index.saturating_sub(*n as usize),
        FrameBound::CurrentRow => index,
        FrameBound::Following(n) => (index + *n as usize).min(len.saturating_sub(1)),
        FrameBound::UnboundedFollowing => {
            if is_start {
                index
            } else {
                len.saturating_sub(1)
            }
        }
    }
}

/// RANGE bounds: CURRENT ROW extends across ORDER BY peers; numeric
/// offsets slide against the single ORDER BY key.
fn range_bound(bound: &FrameBound, rows: &[WinRow], index: usize, is_start: bool) -> Result<usize> {
    let len = rows.len();
    match bound {
        FrameBound::UnboundedPreceding => Ok(0),
        FrameBound::UnboundedFollowing => Ok(len.saturating_sub(1)),
        FrameBound::CurrentRow => {
            if is_start {
                let mut i = index;
                while i > 0 && same_keys(&rows[i - 1], &rows[index]) {
                    i -= 1;
                }
                Ok(i)
            } else {
                let mut i = index;
                while i + 1 < len && same_keys(&rows[i + 1], &rows[index]) {
                    i += 1;
                }
                Ok(i)
            }
        }
        FrameBound::Preceding(n) | FrameBound::Following(n) => {
            let (key, asc) = keys(&rows[index])
                .first()
                .cloned()
                .ok_or_else(|| {
                    Error::invalid_argument("RANGE frame with an offset requires ORDER BY")
                })?;
            let offset = Value::Int64(if matches!(bound, FrameBound::Preceding(_)) {
                -*n
            } else {
                *n
            });
            let shift = if asc { offset } else { ops::neg(&[offset])? };
            let edge = ops::add(&[key, shift])?;
            if is_start {
                for (i, row) in rows.iter().enumerate() {
                    if let Some((k, _)) = keys(row).first() {
                        let ord = k.compare(&edge)?;
                        let inside = if asc { ord.is_ge() } else { ord.is_le() };
                        if inside {
                            return Ok(i);
                        }
                    }
                }
                Ok(len)
            } else {
                for (i, row) in rows.iter().enumerate().rev() {
                    if let Some((k, _)) = keys(row).first() {
                        let ord = k.compare(&edge)?;
                        let inside = if asc { ord.is_le() } else { ord.is_ge() };
                        if inside {
                            return Ok(i);
                        }
                    }
                }
                // every key is past the edge
                Ok(0)
            }
        }
    }
}

fn first_arg(row: &WinRow) -> Value {
    row.args.first().cloned().unwrap_or(Value::Null)
}

impl WindowKind {
    pub fn evaluate(&self, rows: &[WinRow], frame: &[usize], index: usize) -> Result<Value> {
        match self {
            WindowKind::RowNumber => Ok(Value::Int64(index as i64 + 1)),
            WindowKind::Rank => {
                let mut rank = 1i64;
                for i in 1..=index {
                    if !same_keys(&rows[i], &rows[i - 1]) {
                        rank = i as i64 + 1;
                    }
                }
                Ok(Value::Int64(rank))
            }
            WindowKind::DenseRank => {
                let mut rank = 1i64;
                for i in 1..=index {
                    if !same_keys(&rows[i], &rows[i - 1]) {
                        rank += 1;
                    }
                }
                Ok(Value::Int64(rank))
            }
            WindowKind::PercentRank => {
                if rows.len() <= 1 {
                    return Ok(Value::float64(0.0));
                }
                let rank = WindowKind::Rank.evaluate(rows, frame, index)?.to_int64()?;
                Ok(Value::float64(
                    (rank - 1) as f64 / (rows.len() - 1) as f64,
                ))
            }
            WindowKind::Lag | WindowKind::Lead => {
                let row = &rows[index];
                let offset = match row.args.get(1) {
                    Some(v) if !v.is_null() => v.to_int64()?,
                    _ => 1,
                };
                let default = row.args.get(2).cloned().unwrap_or(Value::Null);
                let target = if matches!(self, WindowKind::Lag) {
                    index as i64 - offset
                } else {
                    index as i64 + offset
                };
                if target < 0 || target as usize >= rows.len() {
                    return Ok(default);
                }
                Ok(first_arg(&rows[target as usize]))
            }
            WindowKind::FirstValue | WindowKind::LastValue => {
                let row = &rows[index];
                let picks: Box<dyn Iterator<Item = &usize>> =
                    if matches!(self, WindowKind::FirstValue) {
                        Box::new(frame.iter())
                    } else {
                        Box::new(frame.iter().rev())
                    };
                for &i in picks {
                    let v = first_arg(&rows[i]);
                    if !row.opts.ignore_nulls || !v.is_null() {
                        return Ok(v);
                    }
                }
                Ok(Value::Null)
            }
            WindowKind::Sum => {
                let mut acc: Option<Value> = None;
                for &i in frame {
                    let v = first_arg(&rows[i]);
                    if v.is_null() {
                        continue;
                    }
                    acc = Some(match acc.take() {
                        None => v,
                        Some(total) => ops::add(&[total, v])?,
                    });
                }
                Ok(acc.unwrap_or(Value::Null))
            }
            WindowKind::Avg => {
                let mut acc: Option<Value> = None;
                let mut n = 0i64;
                for &i in frame {
                    let v = first_arg(&rows[i]);
                    if v.is_null() {
                        continue;
                    }
                    n += 1;
                    acc = Some(match acc.take() {
                        None => v,
                        Some(total) => ops::add(&[total, v])?,
                    });
                }
                match acc {
                    None => Ok(Value::Null),
                    Some(total) => ops::div_inner(&total, &Value::Int64(n), "AVG"),
                }
            }
            WindowKind::Count => {
                let mut n = 0i64;
                for &i in frame {
                    match rows[i].args.first() {
                        Some(v) if v.is_null() => {}
                        _ => n += 1,
                    }
                }
                Ok(Value::Int64(n))
            }
            WindowKind::Min | WindowKind::Max => {
                let mut best: Option<Value> = None;
                for &i in frame {
                    let v = first_arg(&rows[i]);
                    if v.is_null() {
                        continue;
                    }
                    best = Some(match best.take() {
                        None => v,
                        Some(cur) => {
                            let ord = v.compare(&cur)?;
                            let replace = if matches!(self, WindowKind::Max) {
                                ord == Ordering::Greater
                            } else {
                                ord == Ordering::Less
                            };
                            if replace { v } else { cur }
                        }
                    });
                }
                Ok(best.unwrap_or(Value::Null))
            }
            WindowKind::Stddev
            | WindowKind::StddevPop
            | WindowKind::StddevSamp
            | WindowKind::Variance
            | WindowKind::VarPop
            | WindowKind::VarSamp => {
                let values: Vec<f64> = collect_floats(rows, frame, 0)?;
                let n = values.len();
                let population = matches!(self, WindowKind::StddevPop | WindowKind::VarPop);
                let needed = if population { 1 } else { 2 };
                if n < needed {
                    return Ok(Value::Null);
                }
                let mean = values.iter().sum::<f64>() / n as f64;
                let m2: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
                let var = if population {
                    m2 / n as f64
                } else {
                    m2 / (n - 1) as f64
                };
                let out = match self {
                    WindowKind::Stddev | WindowKind::StddevPop | WindowKind::StddevSamp => {
                        var.sqrt()
                    }
                    _ => var,
                };
                Ok(Value::float64(out))
            }
            WindowKind::CovarPop | WindowKind::CovarSamp => {
                let mut xs = Vec::new();
                let mut ys = Vec::new();
                for &i in frame {
                    let x = rows[i].args.first().cloned().unwrap_or(Value::Null);
                    let y = rows[i].args.get(1).cloned().unwrap_or(Value::Null);
                    if x.is_null() || y.is_null() {
                        continue;
                    }
                    xs.push(x.to_float64()?);
                    ys.push(y.to_float64()?);
                }
                let n = xs.len();
                let population = matches!(self, WindowKind::CovarPop);
                if n < if population { 1 } else { 2 } {
                    return Ok(Value::Null);
                }
                let mx = xs.iter().sum::<f64>() / n as f64;
                let my = ys.iter().sum::<f64>() / n as f64;
                let cov: f64 = xs
                    .iter()
                    .zip(&ys)
                    .map(|(x, y)| (x - mx) * (y - my))
                    .sum();
                let denom = if population { n } else { n - 1 } as f64;
                Ok(Value::float64(cov / denom))
            }
        }
    }
}

fn collect_floats(rows: &[WinRow], frame: &[usize], arg: usize) -> Result<Vec<f64>> {
    let mut out = Vec::with_capacity(frame.len());
    for &i in frame {
        match rows[i].args.get(arg) {
            Some(v) if !v.is_null() => out.push(v.to_float64()?),
            _ => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CallOptions;

    fn row(value: i64, key: i64) -> WinRow {
        WinRow {
            args: vec![Value::Int64(value)],
            opts: CallOptions {
                order_by: vec![(Value::Int64(key), true)],
                window: Some(None),
                ..CallOptions::default()
            },
        }
    }

    #[test]
    fn rank_skips_after_ties_dense_rank_does_not() {
        let rows = vec![row(10, 1), row(20, 1), row(30, 2)];
        let frame: Vec<usize> = vec![];
        let ranks: Vec<i64> = (0..3)
            .map(|i| {
                WindowKind::Rank
                    .evaluate(&rows, &frame, i)
                    .unwrap()
                    .to_int64()
                    .unwrap()
            })
            .collect();
        assert_eq!(ranks, vec![1, 1, 3]);
        let dense: Vec<i64> = (0..3)
            .map(|i| {
                WindowKind::DenseRank
                    .evaluate(&rows, &frame, i)
                    .unwrap()
                    .to_int64()
                    .unwrap()
            })
            .collect();
        assert_eq!(dense, vec![1, 1, 2]);
    }

    #[test]
    fn default_frame_includes_peers() {
        let rows = vec![row(10, 1), row(20, 1), row(30, 2)];
        // ties expand the running frame over both peers
        assert_eq!(frame_indices(&rows, 0).unwrap(), vec![0, 1]);
        assert_eq!(frame_indices(&rows, 2).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn rows_frame_with_offsets() {
        let mut rows = vec![row(10, 1), row(20, 2), row(30, 3), row(40, 4)];
        for r in &mut rows {
            r.opts.window = Some(Some(FrameSpec {
                units: FrameUnits::Rows,
                start: FrameBound::Preceding(1),
                end: FrameBound::Following(1),
            }));
        }
        assert_eq!(frame_indices(&rows, 0).unwrap(), vec![0, 1]);
        assert_eq!(frame_indices(&rows, 2).unwrap(), vec![1, 2, 3]);
        let sum = WindowKind::Sum
            .evaluate(&rows, &frame_indices(&rows, 2).unwrap(), 2)
            .unwrap();
        assert_eq!(sum, Value::Int64(90));
    }

    #[test]
    fn lag_and_lead_with_defaults() {
        let mut rows = vec![row(10, 1), row(20, 2)];
        rows[0].args.push(Value::Int64(1));
        rows[0].args.push(Value::Int64(-1));
        let lag = WindowKind::Lag.evaluate(&rows, &[], 0).unwrap();
        assert_eq!(lag, Value::Int64(-1));
        let lead = WindowKind::Lead.evaluate(&rows, &[], 0).unwrap();
        assert_eq!(lead, Value::Int64(20));
    }

    #[test]
    fn range_offset_frame_uses_key_distance() {
        let mut rows = vec![row(1, 1), row(2, 2), row(3, 5)];
        for r in &mut rows {
            r.opts.window = Some(Some(FrameSpec {
                units: FrameUnits::Range,
                start: FrameBound::Preceding(1),
                end: FrameBound::CurrentRow,
            }));
        }
        // key 5 has no peer within distance 1
        assert_eq!(frame_indices(&rows, 2).unwrap(), vec![2]);
        assert_eq!(frame_indices(&rows, 1).unwrap(), vec![0, 1]);
    }
}

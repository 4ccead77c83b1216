//! Builders for sweep value sequences.

/// Upper bound on the number of values [`step`] will generate.
pub const MAX_STEP_POINTS: usize = 1_000_000;

/// `steps` evenly spaced values from `start` to `stop`, both included.
///
/// A single step yields `[start]`; zero steps yield nothing.
pub fn linear(start: f64, stop: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let increment = (stop - start) / (steps - 1) as f64;
            (0..steps)
                .map(|i| {
                    if i == steps - 1 {
                        stop
                    } else {
                        start + increment * i as f64
                    }
                })
                .collect()
        }
    }
}

/// Values from `start` towards `stop` in increments of `|step|`, including
/// `stop` when it falls on the grid.
///
/// A non-finite range, or one that would need more than [`MAX_STEP_POINTS`]
/// values, yields nothing.
pub fn step(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let span = stop - start;
    if !span.is_finite() {
        return Vec::new();
    }
    let step = step.abs();
    if step == 0.0 || !step.is_finite() {
        return vec![start];
    }
    let count = (span.abs() / step + 1e-9).floor();
    if !count.is_finite() || count >= MAX_STEP_POINTS as f64 {
        log::warn!(
            "Refusing to step from {} to {} by {}: too many points",
            start,
            stop,
            step
        );
        return Vec::new();
    }
    let steps = count as usize;
    let signed = step.copysign(span);
    (0..=steps).map(|i| start + signed * i as f64).collect()
}

/// `steps` logarithmically spaced values from `start` to `stop`.
///
/// Both ends must have the same sign and be non-zero; otherwise the result is
/// empty.
pub fn logarithmic(start: f64, stop: f64, steps: usize) -> Vec<f64> {
    if start == 0.0 || stop == 0.0 || start.signum() != stop.signum() {
        return Vec::new();
    }
    let sign = start.signum();
    linear(start.abs().log10(), stop.abs().log10(), steps)
        .into_iter()
        .map(|exp| sign * 10f64.powf(exp))
        .collect()
}

/// Forward traversal followed by the way back.
///
/// The turn-around value appears once: `[a, b, c]` becomes `[a, b, c, b, a]`.
pub fn mirrored(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len() * 2);
    out.extend_from_slice(values);
    out.extend(values.iter().rev().skip(1));
    out
}

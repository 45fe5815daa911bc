//! Deterministic bounded maximization for placement searches.
//!
//! A coarse grid scan over the whole box is followed by a compass search
//! around the best sample. Same inputs always give the same answer.

use rayon::prelude::*;

/// Search settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Optimizer {
    /// Evaluation budget, grid included.
    pub max_iterations: usize,
    /// Stop as soon as a score reaches this.
    pub stop_score: f64,
    /// Grid samples per dimension.
    pub grid: usize,
    /// Compass step below which the search ends, relative to the range.
    pub rel_tolerance: f64,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            stop_score: f64::INFINITY,
            grid: 5,
            rel_tolerance: 1e-3,
        }
    }
}

/// Best point found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Optimum<const N: usize> {
    /// Arguments.
    pub params: [f64; N],
    /// Score at `params`.
    pub score: f64,
}

fn clamp<const N: usize>(mut x: [f64; N], bounds: &[(f64, f64); N]) -> [f64; N] {
    for (v, (lo, hi)) in x.iter_mut().zip(bounds) {
        *v = v.clamp(*lo, *hi);
    }
    x
}

impl Optimizer {
    /// Set the early stop score.
    pub fn with_stop_score(mut self, score: f64) -> Self {
        self.stop_score = score;
        self
    }

    /// Set the evaluation budget.
    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    /// Maximize `f` inside `bounds`, starting from `init`.
    pub fn maximize<const N: usize, F>(
        &self,
        f: F,
        init: [f64; N],
        bounds: [(f64, f64); N],
    ) -> Optimum<N>
    where
        F: Fn(&[f64; N]) -> f64 + Sync,
    {
        let score_of = |x: &[f64; N]| {
            let s = f(x);
            if s.is_nan() {
                f64::NEG_INFINITY
            } else {
                s
            }
        };

        let start = clamp(init, &bounds);
        let mut best = Optimum {
            params: start,
            score: score_of(&start),
        };
        let mut evals = 1usize;
        if best.score >= self.stop_score {
            return best;
        }

        // Grid scan, evaluated in parallel and reduced in index order.
        let g = self.grid.max(2);
        let total = g.checked_pow(N as u32).unwrap_or(usize::MAX);
        if total < self.max_iterations {
            let samples: Vec<Optimum<N>> = (0..total)
                .into_par_iter()
                .map(|mut k| {
                    let mut x = [0.0; N];
                    for (d, (lo, hi)) in bounds.iter().enumerate() {
                        let i = k % g;
                        k /= g;
                        x[d] = lo + (hi - lo) * i as f64 / (g - 1) as f64;
                    }
                    Optimum {
                        params: x,
                        score: score_of(&x),
                    }
                })
                .collect();
            evals += total;
            for s in samples {
                if s.score > best.score {
                    best = s;
                }
            }
            if best.score >= self.stop_score {
                return best;
            }
        }

        // Compass search.
        let mut step: [f64; N] = [0.0; N];
        for (s, (lo, hi)) in step.iter_mut().zip(&bounds) {
            *s = (hi - lo) / (2 * (g - 1)) as f64;
        }
        while evals < self.max_iterations {
            let mut improved = false;
            'dims: for d in 0..N {
                for sign in [1.0, -1.0] {
                    let mut x = best.params;
                    x[d] += sign * step[d];
                    let x = clamp(x, &bounds);
                    if x == best.params {
                        continue;
                    }
                    let score = score_of(&x);
                    evals += 1;
                    if score > best.score {
                        best = Optimum { params: x, score };
                        improved = true;
                        if best.score >= self.stop_score {
                            return best;
                        }
                        break 'dims;
                    }
                    if evals >= self.max_iterations {
                        break 'dims;
                    }
                }
            }
            if !improved {
                let mut converged = true;
                for (s, (lo, hi)) in step.iter_mut().zip(&bounds) {
                    *s *= 0.5;
                    if *s > self.rel_tolerance * (hi - lo) {
                        converged = false;
                    }
                }
                if converged {
                    break;
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_finds_interior_maximum() {
        let opt = Optimizer::default();
        let best = opt.maximize(
            |x: &[f64; 2]| -((x[0] - 0.3).powi(2) + (x[1] + 1.2).powi(2)),
            [0.0, 0.0],
            [(-2.0, 2.0), (-2.0, 2.0)],
        );
        assert_relative_eq!(best.params[0], 0.3, epsilon = 1e-2);
        assert_relative_eq!(best.params[1], -1.2, epsilon = 1e-2);
    }

    #[test]
    fn test_respects_bounds_and_stop_score() {
        let opt = Optimizer::default().with_stop_score(0.5);
        let best = opt.maximize(|x: &[f64; 1]| x[0], [0.0], [(0.0, 1.0)]);
        assert!(best.score >= 0.5);
        assert!(best.params[0] <= 1.0);

        let best = Optimizer::default().maximize(|x: &[f64; 1]| x[0], [5.0], [(0.0, 1.0)]);
        assert_relative_eq!(best.params[0], 1.0);
    }

    #[test]
    fn test_is_deterministic() {
        let f = |x: &[f64; 3]| (x[0] * 3.0).sin() + (x[1] * 2.0).cos() - x[2].abs();
        let bounds = [(-3.0, 3.0), (-3.0, 3.0), (-1.0, 1.0)];
        let a = Optimizer::default().maximize(f, [0.1, 0.2, 0.3], bounds);
        let b = Optimizer::default().maximize(f, [0.1, 0.2, 0.3], bounds);
        assert_eq!(a, b);
    }
}

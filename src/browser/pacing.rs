use rand::{Rng, SeedableRng, rngs::SmallRng};
use std::{sync::Mutex, time::Duration};
use tokio::time::sleep;

const KEYSTROKE_MS: (u64, u64) = (45, 180);
const CHUNK_PAUSE_MS: (u64, u64) = (300, 1200);
const COOLDOWN_FACTOR: u64 = 10;
const POINTER_STEPS: (usize, usize) = (6, 14);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    /// Between form field groups.
    Field,
    /// Between typed characters.
    Keystroke,
    /// Between typed chunks of long text.
    Chunk,
    /// Between two published ads.
    Cooldown,
}

/// Human-like timing and movement inserted between automated actions.
#[allow(async_fn_in_trait)]
pub trait Pacing {
    fn delay(&self, pause: Pause) -> Duration;

    async fn pause(&self, pause: Pause) {
        let delay = self.delay(pause);
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    /// Intermediate pointer positions from `from` to `to`, ending at `to`.
    fn pointer_path(&self, from: (f64, f64), to: (f64, f64)) -> Vec<(f64, f64)>;

    /// Sub-pixel offset added to a click target.
    fn jitter(&self) -> (f64, f64);

    /// Optional idle pointer target and scroll step between field groups.
    fn wander(&self, viewport: (f64, f64)) -> Option<((f64, f64), i64)>;
}

impl<T: Pacing> Pacing for &T {
    fn delay(&self, pause: Pause) -> Duration {
        (**self).delay(pause)
    }

    fn pointer_path(&self, from: (f64, f64), to: (f64, f64)) -> Vec<(f64, f64)> {
        (**self).pointer_path(from, to)
    }

    fn jitter(&self) -> (f64, f64) {
        (**self).jitter()
    }

    fn wander(&self, viewport: (f64, f64)) -> Option<((f64, f64), i64)> {
        (**self).wander(viewport)
    }
}

/// Randomised pacing driven by the configured field window.
pub struct HumanPacing {
    field_window: (Duration, Duration),
    rng: Mutex<SmallRng>,
}

impl HumanPacing {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self::with_rng(min, max, SmallRng::from_os_rng())
    }

    #[cfg(test)]
    pub fn seeded(min: Duration, max: Duration, seed: u64) -> Self {
        Self::with_rng(min, max, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(min: Duration, max: Duration, rng: SmallRng) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            field_window: (min, max),
            rng: Mutex::new(rng),
        }
    }

    fn with_rng_mut<T>(&self, f: impl FnOnce(&mut SmallRng) -> T) -> T {
        let mut guard = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn uniform(&self, min: Duration, max: Duration) -> Duration {
        let (lo, hi) = (min.as_secs_f64(), max.as_secs_f64());
        let secs = self.with_rng_mut(|rng| rng.random_range(lo..=hi));
        Duration::from_secs_f64(secs)
    }
}

impl Pacing for HumanPacing {
    fn delay(&self, pause: Pause) -> Duration {
        let (min, max) = self.field_window;
        match pause {
            Pause::Field => self.uniform(min, max),
            Pause::Keystroke => self.uniform(
                Duration::from_millis(KEYSTROKE_MS.0),
                Duration::from_millis(KEYSTROKE_MS.1),
            ),
            Pause::Chunk => self.uniform(
                Duration::from_millis(CHUNK_PAUSE_MS.0),
                Duration::from_millis(CHUNK_PAUSE_MS.1),
            ),
            Pause::Cooldown => self.uniform(
                min * COOLDOWN_FACTOR as u32,
                max * COOLDOWN_FACTOR as u32,
            ),
        }
    }

    fn pointer_path(&self, from: (f64, f64), to: (f64, f64)) -> Vec<(f64, f64)> {
        self.with_rng_mut(|rng| {
            let steps = rng.random_range(POINTER_STEPS.0..=POINTER_STEPS.1);
            // Quadratic curve through a control point pushed off the straight line.
            let (dx, dy) = (to.0 - from.0, to.1 - from.1);
            let bend = rng.random_range(-0.3..=0.3);
            let control = (
                from.0 + dx / 2.0 - dy * bend,
                from.1 + dy / 2.0 + dx * bend,
            );
            let mut points = Vec::with_capacity(steps);
            for step in 1..=steps {
                let t = step as f64 / steps as f64;
                let inv = 1.0 - t;
                let x = inv * inv * from.0 + 2.0 * inv * t * control.0 + t * t * to.0;
                let y = inv * inv * from.1 + 2.0 * inv * t * control.1 + t * t * to.1;
                if step == steps {
                    points.push(to);
                } else {
                    points.push((
                        x + rng.random_range(-1.5..=1.5),
                        y + rng.random_range(-1.5..=1.5),
                    ));
                }
            }
            points
        })
    }

    fn jitter(&self) -> (f64, f64) {
        self.with_rng_mut(|rng| (rng.random_range(-0.5..0.5), rng.random_range(-0.5..0.5)))
    }

    fn wander(&self, viewport: (f64, f64)) -> Option<((f64, f64), i64)> {
        self.with_rng_mut(|rng| {
            if !rng.random_bool(0.6) {
                return None;
            }
            let target = (
                rng.random_range(viewport.0 * 0.1..viewport.0 * 0.9),
                rng.random_range(viewport.1 * 0.1..viewport.1 * 0.9),
            );
            let scroll = rng.random_range(-120..=240);
            Some((target, scroll))
        })
    }
}

/// Zero-delay pacing with straight pointer moves.
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacing;

#[cfg(test)]
impl Pacing for NoPacing {
    fn delay(&self, _pause: Pause) -> Duration {
        Duration::ZERO
    }

    fn pointer_path(&self, _from: (f64, f64), to: (f64, f64)) -> Vec<(f64, f64)> {
        vec![to]
    }

    fn jitter(&self) -> (f64, f64) {
        (0.0, 0.0)
    }

    fn wander(&self, _viewport: (f64, f64)) -> Option<((f64, f64), i64)> {
        None
    }
}

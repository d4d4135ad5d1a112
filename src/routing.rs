//! Audio Router
//!
//! Fans a processed frame out to named virtual channels. Each route carries a
//! volume and a pan; routes sharing a destination sum sample-wise and the sum
//! is clipped back to 16-bit range once, at the end.
//!
//! # Design Notes
//! - The route list is copy-on-write: mutators build a new `Vec` and swap the
//!   `Arc` under a short write lock, `process_routing` clones the `Arc` under a
//!   read lock and mixes without holding anything.
//! - A non-zero pan turns the mono contribution into interleaved stereo
//!   (`L,R,L,R,...`). A destination that receives any stereo contribution is
//!   stereo; its mono contributions are copied to both sides.

use std::collections::BTreeMap;
use std::f32::consts::{FRAC_PI_4, SQRT_2};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::frame::to_i16;

pub const INPUT: &str = "input";
pub const MAIN_OUT: &str = "main_out";
pub const MONITOR: &str = "monitor";

/// Virtual channels available out of the box.
pub const DEFAULT_CHANNELS: [&str; 4] = [MAIN_OUT, "aux_1", "aux_2", MONITOR];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub source: String,
    pub destination: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub pan: f32,
}

fn default_active() -> bool {
    true
}

fn default_volume() -> f32 {
    1.0
}

impl Route {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            active: true,
            volume: 1.0,
            pan: 0.0,
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_pan(mut self, pan: f32) -> Self {
        self.pan = pan.clamp(-1.0, 1.0);
        self
    }

    fn matches(&self, source: &str, destination: &str) -> bool {
        self.source == source && self.destination == destination
    }
}

/// One destination's output. Stereo samples are interleaved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedFrame {
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl RoutedFrame {
    pub fn peak(&self) -> i16 {
        self.samples
            .iter()
            .map(|s| s.saturating_abs())
            .max()
            .unwrap_or(0)
    }
}

#[derive(Default)]
pub struct Router {
    routes: RwLock<Arc<Vec<Route>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// `input -> main_out` at unity and `input -> monitor` at half volume.
    pub fn with_default_routes() -> Self {
        let router = Self::new();
        router.add_route(Route::new(INPUT, MAIN_OUT));
        router.add_route(Route::new(INPUT, MONITOR).with_volume(0.5));
        router
    }

    fn snapshot(&self) -> Arc<Vec<Route>> {
        match self.routes.read() {
            Ok(r) => Arc::clone(&r),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn update(&self, f: impl FnOnce(&mut Vec<Route>)) {
        let mut guard = match self.routes.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = Vec::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }

    /// Duplicates are allowed and sum like any other converging routes.
    pub fn add_route(&self, route: Route) {
        self.update(|routes| routes.push(route));
    }

    /// Remove every route between `source` and `destination`; returns how many went.
    pub fn remove_route(&self, source: &str, destination: &str) -> usize {
        let mut removed = 0;
        self.update(|routes| {
            let before = routes.len();
            routes.retain(|r| !r.matches(source, destination));
            removed = before - routes.len();
        });
        removed
    }

    fn modify(&self, source: &str, destination: &str, f: impl Fn(&mut Route)) -> usize {
        let mut n = 0;
        self.update(|routes| {
            for r in routes.iter_mut().filter(|r| r.matches(source, destination)) {
                f(r);
                n += 1;
            }
        });
        n
    }

    pub fn set_route_active(&self, source: &str, destination: &str, active: bool) -> usize {
        self.modify(source, destination, |r| r.active = active)
    }

    pub fn set_route_volume(&self, source: &str, destination: &str, volume: f32) -> usize {
        self.modify(source, destination, |r| r.volume = volume)
    }

    pub fn set_route_pan(&self, source: &str, destination: &str, pan: f32) -> usize {
        let pan = pan.clamp(-1.0, 1.0);
        self.modify(source, destination, |r| r.pan = pan)
    }

    pub fn routes(&self) -> Vec<Route> {
        self.snapshot().as_ref().clone()
    }

    /// Mix `frame` (normalized mono) into every destination reachable from `source`.
    pub fn process_routing(&self, frame: &[f32], source: &str) -> BTreeMap<String, RoutedFrame> {
        let routes = self.snapshot();
        let mut mixes: BTreeMap<&str, Mix> = BTreeMap::new();

        for route in routes.iter().filter(|r| r.active && r.source == source) {
            let mix = mixes.entry(route.destination.as_str()).or_default();
            if route.pan != 0.0 {
                let angle = route.pan * FRAC_PI_4;
                let lg = route.volume * SQRT_2 * angle.cos();
                let rg = route.volume * SQRT_2 * angle.sin();
                mix.add_stereo(frame, lg, rg);
            } else {
                mix.add_mono(frame, route.volume);
            }
        }

        mixes
            .into_iter()
            .map(|(dest, mix)| (dest.to_string(), mix.finish()))
            .collect()
    }
}

#[derive(Default)]
struct Mix {
    mono: Option<Vec<f32>>,
    stereo: Option<Vec<f32>>,
}

impl Mix {
    fn add_mono(&mut self, x: &[f32], gain: f32) {
        let acc = self.mono.get_or_insert_with(|| vec![0.0; x.len()]);
        for (a, &v) in acc.iter_mut().zip(x) {
            *a += v * gain;
        }
    }

    fn add_stereo(&mut self, x: &[f32], left: f32, right: f32) {
        let acc = self.stereo.get_or_insert_with(|| vec![0.0; x.len() * 2]);
        for (pair, &v) in acc.chunks_exact_mut(2).zip(x) {
            pair[0] += v * left;
            pair[1] += v * right;
        }
    }

    fn finish(self) -> RoutedFrame {
        let quantize = |v: f32| to_i16(v.clamp(-1.0, 1.0) * i16::MAX as f32);
        match (self.mono, self.stereo) {
            (mono, Some(mut st)) => {
                if let Some(m) = mono {
                    for (pair, v) in st.chunks_exact_mut(2).zip(m) {
                        pair[0] += v;
                        pair[1] += v;
                    }
                }
                RoutedFrame {
                    channels: 2,
                    samples: st.into_iter().map(quantize).collect(),
                }
            }
            (Some(m), None) => RoutedFrame {
                channels: 1,
                samples: m.into_iter().map(quantize).collect(),
            },
            (None, None) => RoutedFrame {
                channels: 1,
                samples: Vec::new(),
            },
        }
    }
}

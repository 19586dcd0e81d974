//! Named zone rectangles and centroid classification.
//!
//! Zones are loaded once at startup and never change during a run. When
//! rectangles overlap, the zone with the smallest area containing the point
//! wins; equal areas fall back to declaration order. Both rules are
//! independent of how the configuration map happens to iterate.

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::Value;

use crate::geometry::Point;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Zone {
    pub name: String,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Zone {
    /// Build a zone, normalising swapped corners. Degenerate or non-finite
    /// rectangles are rejected.
    pub fn new(name: &str, x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("zone name must not be empty"));
        }
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return Err(anyhow!("zone '{}' has non-finite coordinates", name));
        }
        let (x1, x2) = (x1.min(x2), x1.max(x2));
        let (y1, y2) = (y1.min(y2), y1.max(y2));
        if x2 - x1 < 1.0 || y2 - y1 < 1.0 {
            return Err(anyhow!(
                "zone '{}' is degenerate ({}x{})",
                name,
                x2 - x1,
                y2 - y1
            ));
        }
        Ok(Self {
            name: name.to_string(),
            x1,
            y1,
            x2,
            y2,
        })
    }

    /// Edges are inclusive.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x1 && point.x <= self.x2 && point.y >= self.y1 && point.y <= self.y2
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }

    /// Pixel crop (x, y, w, h) of this zone grown by `padding` on every side
    /// and clipped to a `width` x `height` frame. `None` if nothing is left.
    pub fn crop_rect(&self, padding: u32, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let pad = padding as f32;
        let x0 = (self.x1 - pad).floor().max(0.0);
        let y0 = (self.y1 - pad).floor().max(0.0);
        let x1 = (self.x2 + pad).ceil().min(width as f32);
        let y1 = (self.y2 + pad).ceil().min(height as f32);
        if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

#[derive(Clone, Debug, Default)]
pub struct ZoneSet {
    zones: Vec<Zone>,
}

impl ZoneSet {
    /// Later duplicates of a name are dropped.
    pub fn new(zones: Vec<Zone>) -> Self {
        let mut unique: Vec<Zone> = Vec::with_capacity(zones.len());
        for zone in zones {
            if unique.iter().any(|z| z.name == zone.name) {
                log::warn!("duplicate zone '{}' ignored", zone.name);
                continue;
            }
            unique.push(zone);
        }
        Self { zones: unique }
    }

    /// Parse the configured zone mapping `{ name: [x1, y1, x2, y2] }`.
    ///
    /// The mapping may also arrive as a JSON string holding such an object.
    /// Each entry may be a 4-element array or an object with `x1..y2` keys.
    /// Invalid entries are skipped with a warning; they never fail the load.
    pub fn from_config_value(value: &Value) -> Self {
        let parsed;
        let map = match value {
            Value::Null => return Self::default(),
            Value::Object(map) => map,
            Value::String(raw) if raw.trim().is_empty() => return Self::default(),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => {
                    parsed = map;
                    &parsed
                }
                _ => {
                    log::warn!("zones is not a valid JSON object; using no zones");
                    return Self::default();
                }
            },
            _ => {
                log::warn!("zones must be an object of name -> [x1, y1, x2, y2]; using no zones");
                return Self::default();
            }
        };

        let mut zones = Vec::with_capacity(map.len());
        for (name, entry) in map {
            match parse_zone_entry(name, entry) {
                Ok(zone) => zones.push(zone),
                Err(err) => log::warn!("skipping zone '{}': {}", name, err),
            }
        }
        Self::new(zones)
    }

    /// First matching zone under the smallest-area, then declaration-order policy.
    pub fn classify(&self, point: Point) -> Option<&Zone> {
        let mut best: Option<&Zone> = None;
        for zone in self.zones.iter().filter(|z| z.contains(point)) {
            match best {
                Some(current) if current.area() <= zone.area() => {}
                _ => best = Some(zone),
            }
        }
        best
    }

    pub fn classify_name(&self, point: Point) -> Option<String> {
        self.classify(point).map(|zone| zone.name.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.name == name)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

fn parse_zone_entry(name: &str, entry: &Value) -> Result<Zone> {
    let coords: Vec<&Value> = match entry {
        Value::Array(items) => {
            if items.len() != 4 {
                return Err(anyhow!("expected 4 coordinates, got {}", items.len()));
            }
            items.iter().collect()
        }
        Value::Object(obj) => ["x1", "y1", "x2", "y2"]
            .iter()
            .map(|key| obj.get(*key).ok_or_else(|| anyhow!("missing '{}'", key)))
            .collect::<Result<_>>()?,
        _ => return Err(anyhow!("expected [x1, y1, x2, y2]")),
    };

    let mut nums = [0.0f32; 4];
    for (slot, value) in nums.iter_mut().zip(coords) {
        *slot = value
            .as_f64()
            .ok_or_else(|| anyhow!("coordinate {} is not numeric", value))? as f32;
    }
    Zone::new(name, nums[0], nums[1], nums[2], nums[3])
}

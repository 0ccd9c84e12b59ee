//! Geo index over latitude/longitude pairs.

use std::any::Any;
use std::collections::BTreeMap;

use docstore_codec::Value;

use crate::error::CoreResult;
use crate::index::traits::{base_definition, not_indexed, split_paths, Index, IndexKind, IndexedDocument};
use crate::revision::HandleId;
use crate::types::IndexId;

/// Mean earth radius in meters.
const EARTH_RADIUS: f64 = 6_371_000.0;

/// A point in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Latitude, -90..=90.
    pub latitude: f64,
    /// Longitude, -180..=180.
    pub longitude: f64,
}

impl GeoPoint {
    /// A point, or `None` if out of range.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        ((-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)).then_some(Self {
            latitude,
            longitude,
        })
    }

    /// Great-circle distance in meters.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Geo index in one of two layouts:
///
/// - geo1: one attribute holding `[lat, lon]`, or `[lon, lat]` when
///   `geo_json` is set
/// - geo2: separate latitude and longitude attributes
///
/// Documents without valid coordinates are not indexed.
#[derive(Debug)]
pub struct GeoIndex {
    id: IndexId,
    kind: IndexKind,
    fields: Vec<String>,
    paths: Vec<Vec<String>>,
    geo_json: bool,
    points: BTreeMap<HandleId, GeoPoint>,
}

impl GeoIndex {
    /// Index over a single location attribute.
    #[must_use]
    pub fn location(id: IndexId, field: String, geo_json: bool) -> Self {
        let fields = vec![field];
        Self {
            id,
            kind: IndexKind::Geo1,
            paths: split_paths(&fields),
            fields,
            geo_json,
            points: BTreeMap::new(),
        }
    }

    /// Index over separate latitude and longitude attributes.
    #[must_use]
    pub fn lat_lon(id: IndexId, latitude: String, longitude: String) -> Self {
        let fields = vec![latitude, longitude];
        Self {
            id,
            kind: IndexKind::Geo2,
            paths: split_paths(&fields),
            fields,
            geo_json: false,
            points: BTreeMap::new(),
        }
    }

    /// True if a single location is read as `[lon, lat]`.
    #[must_use]
    pub fn geo_json(&self) -> bool {
        self.geo_json
    }

    fn point_of(&self, doc: &Value) -> Option<GeoPoint> {
        match self.kind {
            IndexKind::Geo1 => {
                let pair = doc.get_path(&self.paths[0])?.as_array()?;
                let [a, b] = pair else {
                    return None;
                };
                let (a, b) = (a.as_number()?, b.as_number()?);
                if self.geo_json {
                    GeoPoint::new(b, a)
                } else {
                    GeoPoint::new(a, b)
                }
            }
            _ => {
                let lat = doc.get_path(&self.paths[0])?.as_number()?;
                let lon = doc.get_path(&self.paths[1])?.as_number()?;
                GeoPoint::new(lat, lon)
            }
        }
    }

    /// Up to `limit` documents closest to `center`, nearest first.
    #[must_use]
    pub fn near(&self, center: &GeoPoint, limit: usize) -> Vec<(HandleId, f64)> {
        let mut hits: Vec<(HandleId, f64)> = self
            .points
            .iter()
            .map(|(h, p)| (*h, center.distance(p)))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        hits.truncate(limit);
        hits
    }

    /// Documents within `radius` meters of `center`, nearest first.
    #[must_use]
    pub fn within(&self, center: &GeoPoint, radius: f64) -> Vec<(HandleId, f64)> {
        let mut hits: Vec<(HandleId, f64)> = self
            .points
            .iter()
            .map(|(h, p)| (*h, center.distance(p)))
            .filter(|(_, d)| *d <= radius)
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        hits
    }
}

impl Index for GeoIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn kind(&self) -> IndexKind {
        self.kind
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn sparse(&self) -> bool {
        true
    }

    fn insert(&mut self, doc: &IndexedDocument<'_>, _is_rollback: bool) -> CoreResult<()> {
        if let Some(point) = self.point_of(doc.value) {
            self.points.insert(doc.handle, point);
        }
        Ok(())
    }

    fn remove(&mut self, doc: &IndexedDocument<'_>, is_rollback: bool) -> CoreResult<()> {
        if self.point_of(doc.value).is_none() {
            return Ok(());
        }
        if self.points.remove(&doc.handle).is_none() && !is_rollback {
            return Err(not_indexed(self.id, doc.handle));
        }
        Ok(())
    }

    fn memory(&self) -> usize {
        self.points.len() * std::mem::size_of::<(HandleId, GeoPoint)>()
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    fn lookup(&self, values: &[Value]) -> Vec<HandleId> {
        let coordinates: Option<Vec<f64>> = values.iter().map(Value::as_number).collect();
        let Some(GeoPoint { latitude, longitude }) = coordinates
            .and_then(|c| match c.as_slice() {
                [lat, lon] => GeoPoint::new(*lat, *lon),
                _ => None,
            })
        else {
            return Vec::new();
        };
        self.points
            .iter()
            .filter(|(_, p)| p.latitude == latitude && p.longitude == longitude)
            .map(|(h, _)| *h)
            .collect()
    }

    fn clear(&mut self) {
        self.points.clear();
    }

    fn definition(&self) -> Value {
        let mut def = base_definition(self.id, self.kind, &self.fields, false, true);
        if self.kind == IndexKind::Geo1 {
            def.set("geoJson", Value::from(self.geo_json));
        }
        def
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(lat: f64, lon: f64) -> Value {
        Value::object([(
            "loc",
            Value::Array(vec![Value::Float(lat), Value::Float(lon)]),
        )])
    }

    #[test]
    fn near_orders_by_distance() {
        let mut index = GeoIndex::location(IndexId::new(9), "loc".into(), false);
        let cologne = place(50.94, 6.96);
        let berlin = place(52.52, 13.40);
        let invalid = place(120.0, 0.0);
        index.insert(&IndexedDocument::new(HandleId::new(0), &berlin), false).unwrap();
        index.insert(&IndexedDocument::new(HandleId::new(1), &cologne), false).unwrap();
        index.insert(&IndexedDocument::new(HandleId::new(2), &invalid), false).unwrap();
        assert_eq!(index.len(), 2);

        let bonn = GeoPoint::new(50.73, 7.10).unwrap();
        let hits = index.near(&bonn, 1);
        assert_eq!(hits[0].0, HandleId::new(1));
        assert!(hits[0].1 < 30_000.0);
        assert_eq!(index.within(&bonn, 100_000.0).len(), 1);
    }

    #[test]
    fn geo_json_swaps_order() {
        let mut index = GeoIndex::location(IndexId::new(9), "loc".into(), true);
        let doc = place(6.96, 50.94);
        index.insert(&IndexedDocument::new(HandleId::new(0), &doc), false).unwrap();
        assert_eq!(
            index.lookup(&[Value::Float(50.94), Value::Float(6.96)]),
            vec![HandleId::new(0)]
        );
        assert_eq!(index.definition().get("geoJson"), Some(&Value::from(true)));
    }

    #[test]
    fn lat_lon_fields() {
        let mut index = GeoIndex::lat_lon(IndexId::new(9), "lat".into(), "lon".into());
        let doc = Value::object([("lat", Value::from(10)), ("lon", Value::from(20))]);
        index.insert(&IndexedDocument::new(HandleId::new(4), &doc), false).unwrap();
        assert_eq!(index.kind(), IndexKind::Geo2);
        index.remove(&IndexedDocument::new(HandleId::new(4), &doc), false).unwrap();
        assert!(index.is_empty());
    }
}

//! Shapes that can be used as the payload of geospatial predicates.

use bson::{Bson, Document, doc};

/// Anything that can describe itself as a GeoJSON geometry.
pub trait GeoJson {
    fn geo_json(&self) -> Document;
}

/// A GeoJSON `Point` (`longitude`, `latitude`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub longitude: f64,
    pub latitude: f64,
}

impl Point {
    #[must_use]
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self { longitude, latitude }
    }
}

impl GeoJson for Point {
    fn geo_json(&self) -> Document {
        doc! { "type": "Point", "coordinates": [self.longitude, self.latitude] }
    }
}

/// A GeoJSON `Polygon` made of a single outer ring.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polygon {
    pub ring: Vec<[f64; 2]>,
}

impl Polygon {
    #[must_use]
    pub const fn new(ring: Vec<[f64; 2]>) -> Self {
        Self { ring }
    }
}

impl GeoJson for Polygon {
    fn geo_json(&self) -> Document {
        let ring: Vec<Bson> = self
            .ring
            .iter()
            .map(|[x, y]| Bson::Array(vec![Bson::Double(*x), Bson::Double(*y)]))
            .collect();
        doc! { "type": "Polygon", "coordinates": [Bson::Array(ring)] }
    }
}

impl GeoJson for Document {
    fn geo_json(&self) -> Document {
        self.clone()
    }
}

//! Neighborhood (IRIS) resolution: geocode an address, then find the IRIS
//! polygon containing it.

use std::path::Path;

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use tracing::{info, warn};

use quartier_types::api::{AddressRequest, CitiesQuery, IrisResolution};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// -- Polygon index --

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    properties: IrisProperties,
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct IrisProperties {
    code_iris: String,
    nom_iris: String,
}

type Ring = Vec<Vec<f64>>;

impl Geometry {
    /// Polygons of a Polygon or MultiPolygon; `None` for other shapes.
    fn into_polygons(self) -> Option<Vec<Vec<Ring>>> {
        match self.kind.as_str() {
            "Polygon" => serde_json::from_value(self.coordinates).ok().map(|rings| vec![rings]),
            "MultiPolygon" => serde_json::from_value(self.coordinates).ok(),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct IrisArea {
    resolution: IrisResolution,
    /// Each polygon is an outer ring followed by its holes
    polygons: Vec<Vec<Ring>>,
}

/// IRIS polygons loaded from a GeoJSON FeatureCollection.
#[derive(Debug, Default)]
pub struct IrisIndex {
    areas: Vec<IrisArea>,
}

impl IrisIndex {
    pub fn from_geojson(raw: &str) -> anyhow::Result<Self> {
        let collection: FeatureCollection = serde_json::from_str(raw)?;
        let areas = collection
            .features
            .into_iter()
            .filter_map(|feature| {
                let polygons = feature.geometry?.into_polygons()?;
                Some(IrisArea {
                    resolution: IrisResolution {
                        iris_code: feature.properties.code_iris,
                        iris_name: feature.properties.nom_iris,
                    },
                    polygons,
                })
            })
            .collect();
        Ok(Self { areas })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let index = Self::from_geojson(&raw)?;
        info!("Loaded {} IRIS areas from {}", index.len(), path.display());
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn locate(&self, lon: f64, lat: f64) -> Option<&IrisResolution> {
        self.areas
            .iter()
            .find(|area| area.polygons.iter().any(|rings| polygon_contains(rings, lon, lat)))
            .map(|area| &area.resolution)
    }
}

fn polygon_contains(rings: &[Ring], x: f64, y: f64) -> bool {
    let Some((outer, holes)) = rings.split_first() else {
        return false;
    };
    ring_contains(outer, x, y) && !holes.iter().any(|hole| ring_contains(hole, x, y))
}

/// Even-odd ray casting.
fn ring_contains(ring: &Ring, x: f64, y: f64) -> bool {
    let points: Vec<(f64, f64)> = ring
        .iter()
        .filter_map(|p| Some((*p.first()?, *p.get(1)?)))
        .collect();
    if points.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (xi, yi) = points[i];
        let (xj, yj) = points[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

// -- Remote APIs --

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    features: Vec<GeocodeFeature>,
}

#[derive(Debug, Deserialize)]
struct GeocodeFeature {
    geometry: PointGeometry,
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PointGeometry {
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct City {
    nom: String,
}

pub struct IrisService {
    client: reqwest::Client,
    address_api: String,
    geo_api: String,
    index: Option<IrisIndex>,
}

impl IrisService {
    pub fn new(address_api: impl Into<String>, geo_api: impl Into<String>, index: Option<IrisIndex>) -> Self {
        Self {
            client: reqwest::Client::new(),
            address_api: address_api.into().trim_end_matches('/').to_string(),
            geo_api: geo_api.into().trim_end_matches('/').to_string(),
            index,
        }
    }

    /// City names for a postal code.
    pub async fn cities(&self, postal_code: &str) -> ApiResult<Vec<String>> {
        let postal_code = postal_code.trim();
        if postal_code.is_empty() {
            return Err(ApiError::bad_request("postalCode is required"));
        }

        let cities: Vec<City> = self
            .client
            .get(format!("{}/communes", self.geo_api))
            .query(&[("codePostal", postal_code)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                warn!("Geo API request failed: {}", e);
                ApiError::Unavailable("City lookup is unavailable".into())
            })?
            .json()
            .await
            .map_err(|e| {
                warn!("Geo API returned an unexpected body: {}", e);
                ApiError::Unavailable("City lookup is unavailable".into())
            })?;

        Ok(cities.into_iter().map(|c| c.nom).collect())
    }

    pub async fn resolve(&self, address: &AddressRequest) -> ApiResult<IrisResolution> {
        let (street, postal_code, city) = require_address(address)?;
        let query = format!("{}, {} {}", street, postal_code, city);

        let geocoded = self.geocode(&query).await.map_err(|e| {
            warn!("Geocoding '{}' failed: {:#}", query, e);
            ApiError::bad_request("Error while geocoding the address")
        })?;
        let feature = geocoded
            .features
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::not_found("Address not found"))?;

        match &self.index {
            Some(index) => {
                let (lon, lat) = match feature.geometry.coordinates.as_slice() {
                    [lon, lat, ..] => (*lon, *lat),
                    _ => return Err(ApiError::bad_request("Error while geocoding the address")),
                };
                index
                    .locate(lon, lat)
                    .cloned()
                    .ok_or_else(|| ApiError::not_found("No IRIS area found at this address"))
            }
            None => {
                let text = |key: &str| {
                    feature
                        .properties
                        .get(key)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                };
                match (text("iris"), text("iris_name")) {
                    (Some(iris_code), Some(iris_name)) => Ok(IrisResolution { iris_code, iris_name }),
                    _ => Err(ApiError::not_found("No IRIS area found at this address")),
                }
            }
        }
    }

    async fn geocode(&self, query: &str) -> reqwest::Result<GeocodeResponse> {
        self.client
            .get(format!("{}/search/", self.address_api))
            .query(&[("q", query), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

/// Street, postal code and city, all required and trimmed.
pub fn require_address(address: &AddressRequest) -> ApiResult<(String, String, String)> {
    let field = |value: &Option<String>, name: &str| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request(format!("{} is required", name)))
    };
    Ok((
        field(&address.street, "street")?,
        field(&address.postal_code, "postalCode")?,
        field(&address.city, "city")?,
    ))
}

// -- Handlers --

/// GET /iris/cities?postalCode=
pub async fn cities(
    State(state): State<AppState>,
    Query(query): Query<CitiesQuery>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.iris.cities(&query.postal_code).await?))
}

/// POST /iris/resolve
pub async fn resolve(
    State(state): State<AppState>,
    Json(address): Json<AddressRequest>,
) -> ApiResult<Json<IrisResolution>> {
    Ok(Json(state.iris.resolve(&address).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOJSON: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "code_iris": "751010101", "nom_iris": "Saint-Germain", "commune": "Paris" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [
                        [[0, 0], [10, 0], [10, 10], [0, 10], [0, 0]],
                        [[4, 4], [6, 4], [6, 6], [4, 6], [4, 4]]
                    ]
                }
            },
            {
                "type": "Feature",
                "properties": { "code_iris": "930010201", "nom_iris": "Centre" },
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [
                        [[[20, 0], [30, 0], [30, 10], [20, 10], [20, 0]]],
                        [[[40, 0], [50, 0], [45, 10], [40, 0]]]
                    ]
                }
            },
            {
                "type": "Feature",
                "properties": { "code_iris": "x", "nom_iris": "point" },
                "geometry": { "type": "Point", "coordinates": [1, 1] }
            }
        ]
    }"#;

    #[test]
    fn locates_points_in_polygons() {
        let index = IrisIndex::from_geojson(GEOJSON).unwrap();
        assert_eq!(index.len(), 2);

        assert_eq!(index.locate(1.0, 1.0).unwrap().iris_code, "751010101");
        assert_eq!(index.locate(25.0, 5.0).unwrap().iris_name, "Centre");
        assert_eq!(index.locate(45.0, 2.0).unwrap().iris_code, "930010201");
        assert!(index.locate(15.0, 5.0).is_none());
    }

    #[test]
    fn holes_are_excluded() {
        let index = IrisIndex::from_geojson(GEOJSON).unwrap();
        assert!(index.locate(5.0, 5.0).is_none());
        assert!(index.locate(3.0, 5.0).is_some());
    }

    #[test]
    fn addresses_need_every_part() {
        let mut address = AddressRequest {
            street: Some(" 1 rue de Rivoli ".into()),
            postal_code: Some("75001".into()),
            city: Some("Paris".into()),
        };
        let (street, _, _) = require_address(&address).unwrap();
        assert_eq!(street, "1 rue de Rivoli");

        address.city = Some("  ".into());
        assert!(require_address(&address).is_err());
    }
}

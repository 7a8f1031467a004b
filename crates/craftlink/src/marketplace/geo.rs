use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::jobs::Job;

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in kilometres.
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        haversine_km(*self, *other)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("geocoding failed: {0}")]
pub struct GeocodeError(pub String);

/// Resolves free-text addresses to coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn search(&self, address: &str) -> Result<Vec<Coordinates>, GeocodeError>;
}

pub fn haversine_km(from: Coordinates, to: Coordinates) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lat = (to.latitude - from.latitude).to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Jobs within `radius_km` of `origin`, nearest first.
///
/// Jobs whose location cannot be resolved are left out.
pub async fn nearby_jobs<G>(
    geocoder: &G,
    jobs: Vec<Job>,
    origin: Coordinates,
    radius_km: f64,
) -> Vec<(Job, f64)>
where
    G: Geocoder + ?Sized,
{
    let mut nearby = Vec::new();
    for job in jobs {
        let point = match geocoder.search(&job.location).await {
            Ok(results) => results.into_iter().next(),
            Err(err) => {
                debug!(job_id = %job.id, location = %job.location, error = %err, "skipping job");
                None
            }
        };
        let Some(point) = point else { continue };

        let distance = haversine_km(origin, point);
        if distance <= radius_km {
            nearby.push((job, distance));
        }
    }
    nearby.sort_by(|(_, a), (_, b)| a.total_cmp(b));
    nearby
}

/// Lookup table geocoder for demos and tests. Matching is case-insensitive.
#[derive(Debug, Default, Clone)]
pub struct StaticGeocoder {
    places: HashMap<String, Coordinates>,
}

impl StaticGeocoder {
    pub fn with_place(mut self, address: &str, coordinates: Coordinates) -> Self {
        self.places.insert(address.to_lowercase(), coordinates);
        self
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn search(&self, address: &str) -> Result<Vec<Coordinates>, GeocodeError> {
        Ok(self
            .places
            .get(&address.trim().to_lowercase())
            .copied()
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::ids::{JobId, UserId};
    use crate::marketplace::jobs::JobStatus;
    use chrono::Utc;

    const IKEJA: Coordinates = Coordinates::new(6.6018, 3.3515);
    const LEKKI: Coordinates = Coordinates::new(6.4698, 3.5852);
    const ABUJA: Coordinates = Coordinates::new(9.0765, 7.3986);

    fn job(id: &str, location: &str) -> Job {
        let now = Utc::now();
        Job {
            id: JobId::from(id),
            title: format!("Job {id}"),
            description: String::new(),
            category: "Plumbing".to_string(),
            location: location.to_string(),
            budget: None,
            client_id: UserId::from("client-1"),
            client_name: "Chioma".to_string(),
            status: JobStatus::Open,
            professional_id: None,
            professional_name: None,
            application_count: 0,
            has_active_applications: false,
            applications_revision: 0,
            image_urls: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn haversine_matches_known_distance() {
        let distance = haversine_km(IKEJA, ABUJA);
        assert!((distance - 525.0).abs() < 25.0, "got {distance}");
        assert_eq!(haversine_km(LEKKI, LEKKI), 0.0);
    }

    #[tokio::test]
    async fn nearby_jobs_filters_sorts_and_skips_unknown_places() {
        let geocoder = StaticGeocoder::default()
            .with_place("Ikeja", IKEJA)
            .with_place("Lekki", LEKKI)
            .with_place("Abuja", ABUJA);
        let jobs = vec![
            job("far", "Abuja"),
            job("near", "Lekki"),
            job("here", "Ikeja"),
            job("unknown", "Atlantis"),
        ];

        let ids: Vec<String> = nearby_jobs(&geocoder, jobs, IKEJA, 50.0)
            .await
            .into_iter()
            .map(|(job, _)| job.id.to_string())
            .collect();
        assert_eq!(ids, vec!["here".to_string(), "near".to_string()]);
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Points of interest marked on the map.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::comms::controller::BackendSignal;
use crate::comms::BackendFuture;
use crate::DynResult;

const LAT_RANGE: std::ops::RangeInclusive<f64> = -90.0..=90.0;
const LNG_RANGE: std::ops::RangeInclusive<f64> = -180.0..=180.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    pub name: String,
    /// `[lat, lng]`
    pub coords: [f64; 2],
}

impl Poi {
    pub fn new(name: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            name: name.into(),
            coords: [lat, lng],
        }
    }

    pub fn lat(&self) -> f64 {
        self.coords[0]
    }

    pub fn lng(&self) -> f64 {
        self.coords[1]
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoiError {
    #[error("Invalid coordinates: lat={lat}, lng={lng}")]
    InvalidCoordinates { lat: f64, lng: f64 },
    #[error("POI name must not be empty")]
    EmptyName,
    #[error("POI '{0}' not found")]
    NotFound(String),
    #[error("POI with name '{0}' already exists")]
    NameTaken(String),
}

/// In-memory POI table keyed (and listed) by name.
#[derive(Debug, Clone, Default)]
pub struct PoiStore {
    pois: BTreeMap<String, [f64; 2]>,
}

impl PoiStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pois.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Poi> {
        self.pois.get(name).map(|c| Poi {
            name: name.to_string(),
            coords: *c,
        })
    }

    /// All POIs ordered by name.
    pub fn list(&self) -> Vec<Poi> {
        self.pois
            .iter()
            .map(|(name, coords)| Poi {
                name: name.clone(),
                coords: *coords,
            })
            .collect()
    }

    /// Insert, or replace the coordinates of an existing POI.
    pub fn add(&mut self, poi: Poi) -> Result<(), PoiError> {
        let [lat, lng] = poi.coords;
        if !LAT_RANGE.contains(&lat) || !LNG_RANGE.contains(&lng) {
            return Err(PoiError::InvalidCoordinates { lat, lng });
        }
        if poi.name.is_empty() {
            return Err(PoiError::EmptyName);
        }
        self.pois.insert(poi.name, poi.coords);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Poi, PoiError> {
        self.pois
            .remove_entry(name)
            .map(|(name, coords)| Poi { name, coords })
            .ok_or_else(|| PoiError::NotFound(name.to_string()))
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), PoiError> {
        if old.is_empty() || new.is_empty() {
            return Err(PoiError::EmptyName);
        }
        if old == new {
            return if self.pois.contains_key(old) {
                Ok(())
            } else {
                Err(PoiError::NotFound(old.to_string()))
            };
        }
        if self.pois.contains_key(new) {
            return Err(PoiError::NameTaken(new.to_string()));
        }
        let coords = self
            .pois
            .remove(old)
            .ok_or_else(|| PoiError::NotFound(old.to_string()))?;
        self.pois.insert(new.to_string(), coords);
        Ok(())
    }
}

/// POI operations exposed by the backend bridge.
pub trait PoiBackend: Send + Sync {
    fn get_pois<'a>(&'a self) -> BackendFuture<'a, Vec<Poi>>;

    /// Returns false when the backend rejected the POI.
    fn add_poi<'a>(&'a self, poi: Poi) -> BackendFuture<'a, bool>;

    fn remove_poi<'a>(&'a self, name: &'a str) -> BackendFuture<'a, bool>;

    fn rename_poi<'a>(&'a self, old: &'a str, new: &'a str) -> BackendFuture<'a, bool>;
}

/// Keeps a local copy of the backend's POI list.
pub struct PoiManager<B: PoiBackend + ?Sized> {
    backend: Arc<B>,
    pois: Vec<Poi>,
}

impl<B: PoiBackend + ?Sized> PoiManager<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            pois: Vec::new(),
        }
    }

    pub fn pois(&self) -> &[Poi] {
        &self.pois
    }

    pub fn find(&self, name: &str) -> Option<&Poi> {
        self.pois.iter().find(|p| p.name == name)
    }

    pub async fn refresh(&mut self) -> DynResult<&[Poi]> {
        self.pois = self.backend.get_pois().await?;
        debug!("POI list refreshed ({} entries)", self.pois.len());
        Ok(&self.pois)
    }

    pub async fn add(&mut self, poi: Poi) -> DynResult<bool> {
        let name = poi.name.clone();
        let ok = self.backend.add_poi(poi).await?;
        self.after_mutation("add", &name, ok).await
    }

    pub async fn remove(&mut self, name: &str) -> DynResult<bool> {
        let ok = self.backend.remove_poi(name).await?;
        self.after_mutation("remove", name, ok).await
    }

    pub async fn rename(&mut self, old: &str, new: &str) -> DynResult<bool> {
        let ok = self.backend.rename_poi(old, new).await?;
        self.after_mutation("rename", old, ok).await
    }

    /// Mirror a pushed `pois_updated` list.
    pub fn on_pois_updated(&mut self, pois: Vec<Poi>) {
        self.pois = pois;
    }

    /// Apply a backend signal; returns true if it was a POI update.
    pub fn handle_signal(&mut self, signal: &BackendSignal) -> bool {
        match signal {
            BackendSignal::PoisUpdated(pois) => {
                self.on_pois_updated(pois.clone());
                true
            }
            _ => false,
        }
    }

    async fn after_mutation(&mut self, action: &str, name: &str, ok: bool) -> DynResult<bool> {
        if ok {
            self.refresh().await?;
        } else {
            warn!("Backend refused to {} POI '{}'", action, name);
        }
        Ok(ok)
    }
}

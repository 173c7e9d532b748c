//! Geographic entities and the registry used for fallback chaining.
//!
//! Entities reference their parent by id only; the registry resolves those
//! references so fallback levels (parent region, state, comparables) can be
//! found without entities owning each other.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Namespace for deterministic entity ids.
const GEO_NAMESPACE: Uuid = Uuid::from_u128(0x6d61_726b_6574_2d63_6f6e_7365_6e73_7573);

/// Stable geographic entity identifier.
///
/// Derived from the entity's level and normalized name, so the same place
/// gets the same id across runs.
///
/// # Examples
///
/// ```
/// use market_consensus::{GeoEntityId, GeoLevel};
///
/// let a = GeoEntityId::derive("Springfield", GeoLevel::City);
/// let b = GeoEntityId::derive("  springfield ", GeoLevel::City);
/// assert_eq!(a, b);
/// assert_ne!(a, GeoEntityId::derive("Springfield", GeoLevel::County));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeoEntityId(Uuid);

impl GeoEntityId {
    /// Derives the id for a named entity at `level`.
    #[must_use]
    pub fn derive(name: &str, level: GeoLevel) -> Self {
        let key = format!("{}:{}", level, normalize_name(name));
        Self(Uuid::new_v5(&GEO_NAMESPACE, key.as_bytes()))
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for GeoEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Geographic granularity, narrowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoLevel {
    /// A neighborhood or zip code.
    Neighborhood,
    /// A city or town.
    City,
    /// A county or metro region.
    County,
    /// A state.
    State,
    /// A country.
    Country,
}

impl GeoLevel {
    /// Stable snake_case key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neighborhood => "neighborhood",
            Self::City => "city",
            Self::County => "county",
            Self::State => "state",
            Self::Country => "country",
        }
    }
}

impl fmt::Display for GeoLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeoLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neighborhood" | "zip" => Ok(Self::Neighborhood),
            "city" | "town" => Ok(Self::City),
            "county" | "metro" | "region" => Ok(Self::County),
            "state" => Ok(Self::State),
            "country" => Ok(Self::Country),
            other => Err(ValidationError::UnknownLevel {
                level: other.to_string(),
            }),
        }
    }
}

/// A place that market metrics are reported for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoEntity {
    /// Stable id.
    pub id: GeoEntityId,
    /// Display name, e.g. "Springfield".
    pub name: String,
    /// Granularity.
    pub level: GeoLevel,
    /// Enclosing entity, if known.
    pub parent: Option<GeoEntityId>,
    /// Population, used to pick comparable entities.
    pub population: Option<u64>,
}

impl GeoEntity {
    /// Creates a root entity.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyEntityName` if `name` is blank.
    pub fn new(name: impl Into<String>, level: GeoLevel) -> Result<Self, ValidationError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::EmptyEntityName);
        }
        Ok(Self {
            id: GeoEntityId::derive(&name, level),
            name,
            level,
            parent: None,
            population: None,
        })
    }

    /// Sets the enclosing entity.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidParent` unless the parent is broader.
    pub fn with_parent(mut self, parent: &Self) -> Result<Self, ValidationError> {
        if parent.level <= self.level {
            return Err(ValidationError::InvalidParent {
                child: self.name,
                parent: parent.name.clone(),
            });
        }
        self.parent = Some(parent.id);
        Ok(self)
    }

    /// Sets the population.
    #[must_use]
    pub const fn with_population(mut self, population: u64) -> Self {
        self.population = Some(population);
        self
    }
}

impl fmt::Display for GeoEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.level)
    }
}

/// Serializable entity description, with the parent given by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoEntitySpec {
    /// Display name.
    pub name: String,
    /// Granularity.
    pub level: GeoLevel,
    /// Name of the enclosing entity.
    #[serde(default)]
    pub parent: Option<String>,
    /// Population.
    #[serde(default)]
    pub population: Option<u64>,
}

/// Registry of known entities.
#[derive(Debug, Clone, Default)]
pub struct GeoRegistry {
    entities: HashMap<GeoEntityId, GeoEntity>,
}

impl GeoRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from specs. Parents may appear in any order.
    ///
    /// A parent name is resolved to the narrowest registered entity of that
    /// name that is broader than the child.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for blank names, unknown parents or parents
    /// that are not broader than their child.
    pub fn from_specs(specs: &[GeoEntitySpec]) -> Result<Self, ValidationError> {
        let mut registry = Self::new();
        for spec in specs {
            let mut entity = GeoEntity::new(&spec.name, spec.level)?;
            entity.population = spec.population;
            registry.entities.insert(entity.id, entity);
        }
        for spec in specs {
            let Some(parent_name) = &spec.parent else {
                continue;
            };
            let parent = registry
                .find_broader(parent_name, spec.level)
                .ok_or_else(|| ValidationError::UnknownEntity {
                    name: parent_name.clone(),
                })?
                .clone();
            let id = GeoEntityId::derive(&spec.name, spec.level);
            if let Some(child) = registry.entities.remove(&id) {
                let child = child.with_parent(&parent)?;
                registry.entities.insert(id, child);
            }
        }
        Ok(registry)
    }

    /// Adds or replaces an entity.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownEntity` if the parent is not registered.
    pub fn insert(&mut self, entity: GeoEntity) -> Result<GeoEntityId, ValidationError> {
        if let Some(parent) = entity.parent {
            if !self.entities.contains_key(&parent) {
                return Err(ValidationError::UnknownEntity {
                    name: parent.to_string(),
                });
            }
        }
        let id = entity.id;
        self.entities.insert(id, entity);
        Ok(id)
    }

    /// Looks up an entity by id.
    #[must_use]
    pub fn get(&self, id: &GeoEntityId) -> Option<&GeoEntity> {
        self.entities.get(id)
    }

    /// Looks up an entity by name and level.
    #[must_use]
    pub fn find(&self, name: &str, level: GeoLevel) -> Option<&GeoEntity> {
        self.entities.get(&GeoEntityId::derive(name, level))
    }

    /// Number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All entities, ordered by level then name.
    #[must_use]
    pub fn entities(&self) -> Vec<&GeoEntity> {
        let mut all: Vec<_> = self.entities.values().collect();
        all.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.name.cmp(&b.name)));
        all
    }

    /// The direct parent of an entity.
    #[must_use]
    pub fn parent(&self, id: &GeoEntityId) -> Option<&GeoEntity> {
        self.get(id)?.parent.and_then(|p| self.get(&p))
    }

    /// The nearest ancestor at exactly `level`, excluding the entity itself.
    #[must_use]
    pub fn ancestor_at_level(&self, id: &GeoEntityId, level: GeoLevel) -> Option<&GeoEntity> {
        let mut current = self.parent(id);
        // Parents are strictly broader, so this walk terminates.
        while let Some(entity) = current {
            if entity.level == level {
                return Some(entity);
            }
            if entity.level > level {
                return None;
            }
            current = self.parent(&entity.id);
        }
        None
    }

    /// Up to `limit` entities comparable to `id`: same level, same state,
    /// nearest population first, ties broken by name.
    ///
    /// Entities without a population rank after those with one.
    #[must_use]
    pub fn comparables(&self, id: &GeoEntityId, limit: usize) -> Vec<&GeoEntity> {
        let Some(target) = self.get(id) else {
            return Vec::new();
        };
        let state = self.ancestor_at_level(id, GeoLevel::State).map(|s| s.id);

        let mut candidates: Vec<_> = self
            .entities
            .values()
            .filter(|e| e.id != target.id && e.level == target.level)
            .filter(|e| self.ancestor_at_level(&e.id, GeoLevel::State).map(|s| s.id) == state)
            .collect();

        let distance = |e: &GeoEntity| match (e.population, target.population) {
            (Some(a), Some(b)) => a.abs_diff(b),
            _ => u64::MAX,
        };
        candidates.sort_by(|a, b| {
            distance(a)
                .cmp(&distance(b))
                .then_with(|| a.name.cmp(&b.name))
        });
        candidates.truncate(limit);
        candidates
    }

    /// "Name, State" when the entity has a state ancestor, otherwise the name.
    #[must_use]
    pub fn qualified_name(&self, id: &GeoEntityId) -> Option<String> {
        let entity = self.get(id)?;
        Some(match self.ancestor_at_level(id, GeoLevel::State) {
            Some(state) => format!("{}, {}", entity.name, state.name),
            None => entity.name.clone(),
        })
    }

    fn find_broader(&self, name: &str, than: GeoLevel) -> Option<&GeoEntity> {
        let normalized = normalize_name(name);
        self.entities
            .values()
            .filter(|e| e.level > than && normalize_name(&e.name) == normalized)
            .min_by_key(|e| e.level)
    }
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, level: GeoLevel, parent: Option<&str>, population: Option<u64>) -> GeoEntitySpec {
        GeoEntitySpec {
            name: name.to_string(),
            level,
            parent: parent.map(str::to_string),
            population,
        }
    }

    fn illinois() -> GeoRegistry {
        GeoRegistry::from_specs(&[
            spec("Springfield", GeoLevel::City, Some("Sangamon County"), Some(114_000)),
            spec("Peoria", GeoLevel::City, Some("Peoria County"), Some(111_000)),
            spec("Champaign", GeoLevel::City, Some("Champaign County"), Some(88_000)),
            spec("Naperville", GeoLevel::City, Some("Illinois"), Some(149_000)),
            spec("Sangamon County", GeoLevel::County, Some("Illinois"), None),
            spec("Peoria County", GeoLevel::County, Some("Illinois"), None),
            spec("Champaign County", GeoLevel::County, Some("Illinois"), None),
            spec("Illinois", GeoLevel::State, None, None),
            spec("Joplin", GeoLevel::City, Some("Missouri"), Some(112_000)),
            spec("Missouri", GeoLevel::State, None, None),
        ])
        .unwrap()
    }

    #[test]
    fn level_parsing() {
        assert_eq!("County".parse::<GeoLevel>().unwrap(), GeoLevel::County);
        assert!(matches!(
            "galaxy".parse::<GeoLevel>(),
            Err(ValidationError::UnknownLevel { .. })
        ));
    }

    #[test]
    fn blank_name_rejected() {
        assert!(matches!(
            GeoEntity::new("  ", GeoLevel::City),
            Err(ValidationError::EmptyEntityName)
        ));
    }

    #[test]
    fn parent_must_be_broader() {
        let city = GeoEntity::new("Springfield", GeoLevel::City).unwrap();
        let other = GeoEntity::new("Peoria", GeoLevel::City).unwrap();
        assert!(matches!(
            city.with_parent(&other),
            Err(ValidationError::InvalidParent { .. })
        ));
    }

    #[test]
    fn ancestors_resolve() {
        let registry = illinois();
        let springfield = registry.find("Springfield", GeoLevel::City).unwrap();
        assert_eq!(registry.parent(&springfield.id).unwrap().name, "Sangamon County");
        assert_eq!(
            registry
                .ancestor_at_level(&springfield.id, GeoLevel::State)
                .unwrap()
                .name,
            "Illinois"
        );
        assert!(registry
            .ancestor_at_level(&springfield.id, GeoLevel::Country)
            .is_none());
        assert_eq!(
            registry.qualified_name(&springfield.id).unwrap(),
            "Springfield, Illinois"
        );
    }

    #[test]
    fn comparables_stay_in_state_and_sort_by_population() {
        let registry = illinois();
        let springfield = registry.find("Springfield", GeoLevel::City).unwrap();
        let names: Vec<_> = registry
            .comparables(&springfield.id, 3)
            .into_iter()
            .map(|e| e.name.as_str())
            .collect();
        // Naperville's parent is the state itself; it still counts as in-state.
        assert_eq!(names, vec!["Peoria", "Champaign", "Naperville"]);
    }

    #[test]
    fn unknown_parent_rejected() {
        let err = GeoRegistry::from_specs(&[spec("Springfield", GeoLevel::City, Some("Nowhere"), None)]);
        assert!(matches!(err, Err(ValidationError::UnknownEntity { .. })));
    }
}

//! The registry of declared entity types and their dependents.
//!
//! Declaring a `belongs_to` reference on a child records the
//! (child, foreign key) pair against the parent type. The destruction check
//! in [`crate::guard`] walks those pairs.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{EntityType, Error, Result, Versioned};

/// A child entity type and the attribute it uses to reference a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependent {
  pub entity:      String,
  pub foreign_key: String,
}

#[derive(Debug, Default)]
pub struct Registry {
  entities:   BTreeMap<String, EntityType>,
  dependents: BTreeMap<String, Vec<Dependent>>,
}

impl Registry {
  pub fn new() -> Self { Self::default() }

  /// Add a declaration. Names must be unique and valid identifiers.
  pub fn register(&mut self, entity: EntityType) -> Result<()> {
    entity.validate()?;
    if self.entities.contains_key(entity.name()) {
      return Err(Error::Declaration(format!(
        "{} is already registered",
        entity.name()
      )));
    }

    for reference in entity.references() {
      self
        .dependents
        .entry(reference.parent.clone())
        .or_default()
        .push(Dependent {
          entity:      entity.name().to_owned(),
          foreign_key: reference.foreign_key.clone(),
        });
    }

    self.entities.insert(entity.name().to_owned(), entity);
    Ok(())
  }

  /// Register a typed entity through its [`Versioned`] declaration.
  pub fn register_type<T: Versioned>(&mut self) -> Result<()> {
    self.register(T::declare(EntityType::versioned(T::ENTITY))?)
  }

  pub fn get(&self, name: &str) -> Result<&EntityType> {
    self
      .entities
      .get(name)
      .ok_or_else(|| Error::UnknownEntity(name.to_owned()))
  }

  pub fn entities(&self) -> impl Iterator<Item = &EntityType> {
    self.entities.values()
  }

  /// Child types referencing `parent`, in registration order.
  pub fn dependents_of(&self, parent: &str) -> &[Dependent] {
    self.dependents.get(parent).map(Vec::as_slice).unwrap_or_default()
  }

  /// Every reference must name a registered parent. Call once all types are
  /// declared, since children may be registered before their parents.
  pub fn check_references(&self) -> Result<()> {
    for entity in self.entities.values() {
      for reference in entity.references() {
        if !self.entities.contains_key(&reference.parent) {
          return Err(Error::Declaration(format!(
            "{}.{} references unknown entity type {}",
            entity.name(),
            reference.name,
            reference.parent
          )));
        }
      }
    }
    Ok(())
  }
}

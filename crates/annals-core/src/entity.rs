//! Entity-type declarations.
//!
//! Declarations are built once at setup time and handed to a
//! [`crate::Registry`]. Nothing here is consulted through global state.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
  Error, Result,
  record::SPECIAL_COLUMNS,
  uniqueness::Uniqueness,
};

/// A `belongs_to` link from a child entity type to its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
  /// Association name, used as the field of reference validation errors.
  pub name:        String,
  /// Business attribute holding the parent's id.
  pub foreign_key: String,
  /// Parent entity type.
  pub parent:      String,
}

/// A versioned entity type: its table, business attributes and rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
  name:        String,
  attributes:  Vec<String>,
  uniqueness:  Option<Uniqueness>,
  references:  Vec<Reference>,
  append_only: bool,
}

impl EntityType {
  /// Start declaring a versioned entity type stored under `name`.
  pub fn versioned(name: impl Into<String>) -> Self {
    Self {
      name:        name.into(),
      attributes:  Vec::new(),
      uniqueness:  None,
      references:  Vec::new(),
      append_only: false,
    }
  }

  /// Declare a business attribute. Repeats are ignored.
  pub fn attribute(mut self, name: impl Into<String>) -> Self {
    let name = name.into();
    if !self.attributes.contains(&name) {
      self.attributes.push(name);
    }
    self
  }

  pub fn attributes<I>(self, names: I) -> Self
  where
    I: IntoIterator,
    I::Item: Into<String>,
  {
    names.into_iter().fold(self, |this, name| this.attribute(name))
  }

  /// Declare the business key, unique among rows sharing an `obsoleted_dt`.
  /// Attributes it names are declared implicitly.
  ///
  /// May be called once per entity type.
  pub fn validates_uniqueness_of<A, S>(mut self, attributes: A, scope: S) -> Result<Self>
  where
    A: IntoIterator,
    A::Item: Into<String>,
    S: IntoIterator,
    S::Item: Into<String>,
  {
    if self.uniqueness.is_some() {
      return Err(Error::Declaration(format!(
        "uniqueness is already declared for {}",
        self.name
      )));
    }
    let uniqueness = Uniqueness::new(attributes, scope)?;
    let key: Vec<String> =
      uniqueness.business_key().into_iter().map(str::to_owned).collect();
    self = self.attributes(key);
    self.uniqueness = Some(uniqueness);
    Ok(self)
  }

  /// Declare that `foreign_key` holds the id of a `parent` row. New rows may
  /// only reference open parent versions.
  pub fn belongs_to(
    self,
    name: impl Into<String>,
    foreign_key: impl Into<String>,
    parent: impl Into<String>,
  ) -> Self {
    let foreign_key = foreign_key.into();
    let mut this = self.attribute(foreign_key.clone());
    this.references.push(Reference {
      name: name.into(),
      foreign_key,
      parent: parent.into(),
    });
    this
  }

  /// Refuse physical removal while open dependents reference a row.
  pub fn append_only(mut self) -> Self {
    self.append_only = true;
    self
  }

  pub fn name(&self) -> &str { &self.name }

  pub fn business_attributes(&self) -> &[String] { &self.attributes }

  pub fn uniqueness(&self) -> Option<&Uniqueness> { self.uniqueness.as_ref() }

  pub fn references(&self) -> &[Reference] { &self.references }

  pub fn is_append_only(&self) -> bool { self.append_only }

  pub fn has_attribute(&self, name: &str) -> bool {
    self.attributes.iter().any(|a| a == name)
  }

  /// Fail with [`Error::UnknownAttribute`] on the first undeclared name.
  pub fn check_attributes<'a>(
    &self,
    names: impl IntoIterator<Item = &'a String>,
  ) -> Result<()> {
    for name in names {
      if !self.has_attribute(name) {
        return Err(Error::UnknownAttribute {
          entity:    self.name.clone(),
          attribute: name.clone(),
        });
      }
    }
    Ok(())
  }

  /// Validate identifiers; storage interpolates them into statements.
  pub fn validate(&self) -> Result<()> {
    check_identifier(&self.name)?;
    for attr in &self.attributes {
      check_identifier(attr)?;
      if SPECIAL_COLUMNS.contains(&attr.as_str()) {
        return Err(Error::Declaration(format!(
          "{attr:?} is reserved on {}",
          self.name
        )));
      }
    }
    Ok(())
  }
}

fn check_identifier(name: &str) -> Result<()> {
  let mut chars = name.chars();
  let valid = chars
    .next()
    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

  if valid {
    Ok(())
  } else {
    Err(Error::Declaration(format!("{name:?} is not a valid identifier")))
  }
}

// ─── Typed entities ──────────────────────────────────────────────────────────

/// Static capability of a Rust type stored as a versioned entity.
///
/// The serialised fields of the type are its business attributes.
pub trait Versioned: Serialize + DeserializeOwned {
  /// Entity-type name the type is registered under.
  const ENTITY: &'static str;

  /// Add attributes and rules to the bare declaration.
  fn declare(entity: EntityType) -> Result<EntityType>;
}

//! Validated subject identifiers used as store keys.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

const IDENTIFIER_MAX_LEN: usize = 128;

/// Opaque identifier of a managed subject (for example an EVE character id).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);
impl SubjectId {
	/// Creates a new identifier after validation.
	pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
		let view = value.as_ref();

		validate_view(view)?;

		Ok(Self(view.to_owned()))
	}

	/// Returns the identifier as a string slice.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Deref for SubjectId {
	type Target = str;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl AsRef<str> for SubjectId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl From<SubjectId> for String {
	fn from(value: SubjectId) -> Self {
		value.0
	}
}
impl TryFrom<String> for SubjectId {
	type Error = IdentifierError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		validate_view(&value)?;

		Ok(Self(value))
	}
}
impl Borrow<str> for SubjectId {
	fn borrow(&self) -> &str {
		&self.0
	}
}
impl Debug for SubjectId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Subject({})", self.0)
	}
}
impl Display for SubjectId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}
impl FromStr for SubjectId {
	type Err = IdentifierError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("Subject identifier cannot be empty.")]
	Empty,
	/// The identifier contains whitespace characters.
	#[error("Subject identifier contains whitespace.")]
	ContainsWhitespace,
	/// The identifier exceeded the allowed byte count.
	#[error("Subject identifier exceeds {max} characters.")]
	TooLong {
		/// Maximum permitted length.
		max: usize,
	},
}

fn validate_view(view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty);
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace);
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

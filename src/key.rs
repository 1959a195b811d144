//! Cache key derivation.
//!
//! A key identifies one cached computation: a fetch operation plus the complete
//! set of arguments it was invoked with. Keys are built from explicit values
//! only. Ambient state that distinguishes two requests, such as the acting user
//! or the current reporting date, must be passed as an argument, otherwise the
//! requests collide on the same entry.

// std
use std::{
	fmt::{self, Debug, Display, Formatter, Write},
	hash::{Hash, Hasher},
};
// crates.io
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Identifier of one cached computation.
///
/// Equality and hashing operate on a SHA-256 digest of the key material, so
/// equal material always yields equal keys while distinct material collides
/// only with negligible probability. The readable material is retained for
/// logs and status output.
#[derive(Clone, Eq)]
pub struct CacheKey {
	metadata: Arc<str>,
	digest: [u8; 32],
}
impl CacheKey {
	/// Build a key from pre-assembled material.
	pub fn new(metadata: impl Into<String>) -> Result<Self> {
		let metadata = metadata.into();

		if metadata.is_empty() {
			return Err(Error::Key { reason: "Key material must not be empty.".into() });
		}

		let hashed = Sha256::digest(metadata.as_bytes());
		let mut digest = [0; 32];

		digest.copy_from_slice(hashed.as_slice());

		Ok(Self { metadata: metadata.into(), digest })
	}

	/// Start a [`KeyBuilder`] for the named fetch operation.
	pub fn builder(operation: impl Into<String>) -> KeyBuilder {
		KeyBuilder { metadata: operation.into() }
	}

	/// Readable material this key was derived from.
	pub fn metadata(&self) -> &str {
		&self.metadata
	}
}
impl PartialEq for CacheKey {
	fn eq(&self, other: &Self) -> bool {
		self.digest == other.digest
	}
}
impl Hash for CacheKey {
	fn hash<H>(&self, state: &mut H)
	where
		H: Hasher,
	{
		self.digest.hash(state);
	}
}
impl Display for CacheKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(&self.metadata)
	}
}
impl Debug for CacheKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("CacheKey").field(&self.metadata).finish()
	}
}

/// Accumulates key material from an operation name and its arguments.
///
/// Arguments are rendered with [`Display`] and joined with `/`. The rendering
/// must be stable; two logically equal argument sets have to produce identical
/// material. Free-form material can be appended through [`fmt::Write`].
#[derive(Debug)]
pub struct KeyBuilder {
	metadata: String,
}
impl KeyBuilder {
	/// Append one argument to the key material.
	pub fn arg(mut self, value: impl Display) -> Self {
		let _ = write!(self.metadata, "/{value}");

		self
	}

	/// Finalize the key, validating the accumulated material.
	pub fn build(self) -> Result<CacheKey> {
		CacheKey::new(self.metadata)
	}
}
impl Write for KeyBuilder {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		self.metadata.write_str(s)
	}
}

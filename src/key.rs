use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexSet;

/// Identity of a loaded unit: the ordered set of library locations it is
/// built from, plus the key of the parent context it delegates to, if any.
///
/// Keys compare by value. Duplicate locations are dropped at construction,
/// keeping the first occurrence, so `["a", "b", "a"]` and `["a", "b"]` name
/// the same unit. Location order is significant: `["a", "b"]` and
/// `["b", "a"]` are different units.
///
/// # Example
///
/// ```
/// use loader_cache::ResourceKey;
///
/// let base = ResourceKey::new(["runtime/core.so"]);
/// let plugin = ResourceKey::new(["plugins/scanner.so"]).with_parent(base.clone());
///
/// assert_ne!(base, plugin);
/// assert_eq!(plugin.parent(), Some(&base));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ResourceKey {
	libraries: Vec<PathBuf>,
	parent: Option<Arc<ResourceKey>>,
}

impl ResourceKey {
	/// Create a key from an ordered set of library locations.
	pub fn new<I, P>(libraries: I) -> Self
	where
		I: IntoIterator<Item = P>,
		P: Into<PathBuf>,
	{
		let set: IndexSet<PathBuf> = libraries.into_iter().map(Into::into).collect();
		Self {
			libraries: set.into_iter().collect(),
			parent: None,
		}
	}

	/// Attach the key of the parent context this unit delegates to.
	///
	/// Two keys with the same locations but different parents identify
	/// different units.
	pub fn with_parent(mut self, parent: ResourceKey) -> Self {
		self.parent = Some(Arc::new(parent));
		self
	}

	/// The library locations, in first-seen order.
	pub fn libraries(&self) -> &[PathBuf] {
		&self.libraries
	}

	/// The parent context key, if any.
	pub fn parent(&self) -> Option<&ResourceKey> {
		self.parent.as_deref()
	}

	/// Whether the key identifies anything at all.
	///
	/// A key with no locations and no parent names nothing and cannot be
	/// cached; `Cache::acquire` rejects it.
	pub fn has_identity(&self) -> bool {
		!self.libraries.is_empty() || self.parent.is_some()
	}
}

impl fmt::Display for ResourceKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("[")?;
		for (i, library) in self.libraries.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{}", library.display())?;
		}
		f.write_str("]")?;
		if let Some(parent) = &self.parent {
			write!(f, " -> {parent}")?;
		}
		Ok(())
	}
}

//! Pluggable lookup of the managed component among installed add-ons.

// self
use crate::{_prelude::*, auth::ComponentId, supervisor::AddonSummary};

/// Component identifier the tunnel client add-on is published under.
pub const DEFAULT_COMPONENT_ID: &str = "local_openenergy_frpc";
/// Display name the tunnel client add-on is published under.
pub const DEFAULT_COMPONENT_NAME: &str = "OpenEnergy FRP Client";

/// Strategy that picks the managed component from the installed list.
pub trait ComponentResolver
where
	Self: Send + Sync,
{
	/// Returns the matching component, if any.
	fn resolve(&self, installed: &[AddonSummary]) -> Option<ComponentId>;

	/// Short description used in errors and logs.
	fn describe(&self) -> String;
}

/// Matches the component identifier exactly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExactIdResolver(pub ComponentId);
impl ComponentResolver for ExactIdResolver {
	fn resolve(&self, installed: &[AddonSummary]) -> Option<ComponentId> {
		installed.iter().find(|addon| addon.slug == self.0).map(|addon| addon.slug.clone())
	}

	fn describe(&self) -> String {
		format!("id `{}`", self.0)
	}
}

/// Matches the first component whose name contains the needle, case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameContainsResolver {
	needle: String,
}
impl NameContainsResolver {
	/// Creates a resolver for `needle`.
	pub fn new(needle: impl Into<String>) -> Self {
		Self { needle: needle.into().to_lowercase() }
	}
}
impl ComponentResolver for NameContainsResolver {
	fn resolve(&self, installed: &[AddonSummary]) -> Option<ComponentId> {
		installed
			.iter()
			.find(|addon| addon.name.to_lowercase().contains(&self.needle))
			.map(|addon| addon.slug.clone())
	}

	fn describe(&self) -> String {
		format!("name containing `{}`", self.needle)
	}
}

/// Ordered chain of resolvers; the first match wins.
#[derive(Clone)]
pub struct ComponentSelector {
	resolvers: Vec<Arc<dyn ComponentResolver>>,
}
impl ComponentSelector {
	/// Empty selector; add resolvers with [`ComponentSelector::then`].
	pub fn empty() -> Self {
		Self { resolvers: Vec::new() }
	}

	/// Selector matching exactly `id`.
	pub fn exact(id: ComponentId) -> Self {
		Self::empty().then(ExactIdResolver(id))
	}

	/// Appends a resolver consulted after the existing ones.
	pub fn then(mut self, resolver: impl 'static + ComponentResolver) -> Self {
		self.resolvers.push(Arc::new(resolver));

		self
	}

	/// Runs the resolvers in order.
	pub fn resolve(&self, installed: &[AddonSummary]) -> Option<ComponentId> {
		self.resolvers.iter().find_map(|resolver| resolver.resolve(installed))
	}

	/// Description of every resolver, in order.
	pub fn describe(&self) -> String {
		if self.resolvers.is_empty() {
			return "nothing".into();
		}

		self.resolvers.iter().map(|resolver| resolver.describe()).collect::<Vec<_>>().join(" or ")
	}
}
impl Default for ComponentSelector {
	/// Exact [`DEFAULT_COMPONENT_ID`] first, then a name containing [`DEFAULT_COMPONENT_NAME`].
	fn default() -> Self {
		let selector = match ComponentId::new(DEFAULT_COMPONENT_ID) {
			Ok(id) => Self::exact(id),
			Err(_) => Self::empty(),
		};

		selector.then(NameContainsResolver::new(DEFAULT_COMPONENT_NAME))
	}
}
impl Debug for ComponentSelector {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ComponentSelector").field(&self.describe()).finish()
	}
}

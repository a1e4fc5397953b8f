//! Permission rules: pure predicates over (peer, doc, channel) context.
//!
//! Rules compose with AND. An empty ruleset allows everything, which is the
//! right default for local-only deployments.

use crate::types::{ChannelKind, DocId, Identity};

/// The context a rule gets to look at. Borrowed from the model, never owned.
#[derive(Clone, Copy, Debug)]
pub struct PermissionCtx<'a> {
	pub peer: &'a Identity,
	pub doc_id: &'a DocId,
	pub channel_kind: ChannelKind,
}

pub type Rule = Box<dyn Fn(&PermissionCtx) -> bool + Send + Sync>;

/// Rulesets for the two permission questions the synchronizer asks:
/// may this peer learn the document exists (`can_reveal`), and may it
/// receive updates for it (`can_update`).
#[derive(Default)]
pub struct Permissions {
	reveal: Vec<Rule>,
	update: Vec<Rule>,
}

impl Permissions {
	/// The default-allow ruleset.
	pub fn allow_all() -> Permissions {
		Permissions::default()
	}

	pub fn reveal_rule(
		mut self,
		rule: impl Fn(&PermissionCtx) -> bool + Send + Sync + 'static,
	) -> Permissions {
		self.reveal.push(Box::new(rule));
		self
	}

	pub fn update_rule(
		mut self,
		rule: impl Fn(&PermissionCtx) -> bool + Send + Sync + 'static,
	) -> Permissions {
		self.update.push(Box::new(rule));
		self
	}

	pub fn can_reveal(&self, ctx: &PermissionCtx) -> bool {
		self.reveal.iter().all(|rule| rule(ctx))
	}

	/// `can_update` implies the peer may also see the document, so the
	/// reveal rules apply here too.
	pub fn can_update(&self, ctx: &PermissionCtx) -> bool {
		self.can_reveal(ctx) && self.update.iter().all(|rule| rule(ctx))
	}
}

impl std::fmt::Debug for Permissions {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Permissions")
			.field("reveal_rules", &self.reveal.len())
			.field("update_rules", &self.update.len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{IdentityKind, PeerId};

	fn ctx<'a>(peer: &'a Identity, doc_id: &'a DocId) -> PermissionCtx<'a> {
		PermissionCtx { peer, doc_id, channel_kind: ChannelKind::Network }
	}

	#[test]
	fn empty_ruleset_allows() {
		let perms = Permissions::allow_all();
		let peer = Identity::user(PeerId(1), "alice");
		let doc = DocId::from("d1");
		assert!(perms.can_reveal(&ctx(&peer, &doc)));
		assert!(perms.can_update(&ctx(&peer, &doc)));
	}

	#[test]
	fn rules_compose_with_and() {
		let perms = Permissions::allow_all()
			.reveal_rule(|ctx| ctx.doc_id.as_str() != "secret")
			.reveal_rule(|ctx| ctx.peer.kind != IdentityKind::Service);

		let user = Identity::user(PeerId(1), "alice");
		let service = Identity::service(PeerId(2), "indexer");
		let public = DocId::from("public");
		let secret = DocId::from("secret");

		assert!(perms.can_reveal(&ctx(&user, &public)));
		assert!(!perms.can_reveal(&ctx(&user, &secret)));
		assert!(!perms.can_reveal(&ctx(&service, &public)));
	}

	#[test]
	fn update_implies_reveal() {
		let perms =
			Permissions::allow_all().reveal_rule(|ctx| ctx.doc_id.as_str() != "secret");
		let peer = Identity::user(PeerId(1), "alice");
		let secret = DocId::from("secret");
		assert!(!perms.can_update(&ctx(&peer, &secret)));
	}
}

// vim: ts=4

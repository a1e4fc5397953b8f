//! Document registry types: the Loro-backed CRDT document and the
//! conversions between wire version vectors and the engine's own.

use loro::{ExportMode, LoroDoc};
use std::sync::Arc;

use crate::prelude::*;

/// A collaborative document. Wraps a [`LoroDoc`] and exposes the surface the
/// synchronizer needs: identity alignment, version reads, snapshot/update
/// export, idempotent import, and the local-update subscription. Everything
/// else (text containers, maps, undo) is reached through [`Doc::inner`].
#[derive(Debug)]
pub struct Doc {
	inner: LoroDoc,
}

impl Doc {
	pub fn new(peer_id: PeerId) -> VelResult<Doc> {
		let inner = LoroDoc::new();
		inner.set_record_timestamp(false);
		inner
			.set_peer_id(peer_id.0)
			.map_err(|err| Error::Internal(format!("set peer id: {}", err)))?;
		Ok(Doc { inner })
	}

	/// The underlying engine document, for container access and mutation.
	pub fn inner(&self) -> &LoroDoc {
		&self.inner
	}

	/// Current version of the operation log.
	pub fn version(&self) -> VersionVec {
		from_loro_vv(&self.inner.oplog_vv())
	}

	pub fn export_snapshot(&self) -> VelResult<Vec<u8>> {
		self.inner
			.export(ExportMode::Snapshot)
			.map_err(|err| Error::Internal(format!("snapshot export: {}", err)))
	}

	/// Export the operations the holder of `from` is missing. A peer whose
	/// version is ahead of or concurrent with ours gets whatever we have
	/// beyond the common ground, possibly nothing.
	pub fn export_update_from(&self, from: &VersionVec) -> VelResult<Vec<u8>> {
		let from = to_loro_vv(from);
		self.inner
			.export(ExportMode::updates(&from))
			.map_err(|err| Error::Internal(format!("update export: {}", err)))
	}

	/// Import snapshot or update bytes. Order-independent and idempotent.
	pub fn import(&self, data: &[u8]) -> VelResult<()> {
		self.inner
			.import(data)
			.map(|_| ())
			.map_err(|err| Error::Decode(format!("crdt import: {}", err)))
	}

	/// Subscribe to local commits. The callback fires before the triggering
	/// `commit()` returns and never fires on imports.
	pub fn subscribe_local_updates(
		&self,
		callback: Box<dyn Fn(&[u8]) -> bool + Send + Sync + 'static>,
	) -> loro::Subscription {
		self.inner.subscribe_local_update(Box::new(move |update| callback(update)))
	}

	/// Convenience accessor for text containers, used all over the tests.
	pub fn text(&self, container: &str) -> String {
		self.inner.get_text(container).to_string()
	}
}

/// Shared handle to a document, as held by the model and the application.
pub type SharedDoc = Arc<Doc>;

pub(crate) fn to_loro_vv(version: &VersionVec) -> loro::VersionVector {
	let mut vv = loro::VersionVector::default();
	for (&peer, &counter) in &version.0 {
		vv.set_end(loro::ID::new(peer.0, counter.min(i32::MAX as u64) as i32));
	}
	vv
}

pub(crate) fn from_loro_vv(vv: &loro::VersionVector) -> VersionVec {
	let mut version = VersionVec::new();
	for (&peer, &counter) in vv.iter() {
		version.insert(PeerId(peer), counter.max(0) as u64);
	}
	version
}


// vim: ts=4

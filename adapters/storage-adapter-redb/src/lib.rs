//! Redb-backed Storage Adapter
//!
//! Implements the StorageAdapter trait over a single redb table. Key
//! components are percent-escaped and joined with a unit separator, so
//! component order and string order agree and prefix scans stay cheap.
//!
//! # Storage Layout
//!
//! One table `vellum_kv` maps the joined key to the raw entry bytes. The
//! sync engine's layout on top of it:
//! - `[doc_id]` for engine snapshots
//! - `[doc_id, "update", version_tag]` for incremental deltas

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use vellum::error::{Error as VelError, VelResult};
use vellum::storage_adapter::{StorageAdapter, StorageEntry, key_has_prefix};

mod error;
pub use error::Error;

const TABLE_KV: TableDefinition<&str, &[u8]> = TableDefinition::new("vellum_kv");

const COMPONENT_SEPARATOR: char = '\u{1f}';

fn escape_component(component: &str) -> String {
	let mut out = String::with_capacity(component.len());
	for ch in component.chars() {
		match ch {
			'%' | '\u{1f}' => {
				out.push('%');
				out.push_str(&format!("{:02X}", ch as u32));
			}
			_ => out.push(ch),
		}
	}
	out
}

fn unescape_component(component: &str) -> Option<String> {
	let mut out = String::with_capacity(component.len());
	let mut chars = component.chars();
	while let Some(ch) = chars.next() {
		if ch == '%' {
			let hi = chars.next()?;
			let lo = chars.next()?;
			let value = u32::from_str_radix(&format!("{}{}", hi, lo), 16).ok()?;
			out.push(char::from_u32(value)?);
		} else {
			out.push(ch);
		}
	}
	Some(out)
}

fn encode_key(key: &[String]) -> String {
	key.iter()
		.map(|component| escape_component(component))
		.collect::<Vec<_>>()
		.join(&COMPONENT_SEPARATOR.to_string())
}

fn decode_key(encoded: &str) -> Option<Vec<String>> {
	encoded.split(COMPONENT_SEPARATOR).map(unescape_component).collect()
}

pub struct StorageAdapterRedb {
	db: Arc<Database>,
}

impl StorageAdapterRedb {
	/// Open or create the database file and make sure the table exists.
	pub async fn new(db_path: impl AsRef<Path>) -> VelResult<StorageAdapterRedb> {
		let db = Database::create(db_path.as_ref()).map_err(|err| Error::DbError(err.to_string()))?;

		let tx = db.begin_write().map_err(|err| Error::DbError(err.to_string()))?;
		{
			let _ = tx
				.open_table(TABLE_KV)
				.map_err(|err| Error::DbError(err.to_string()))?;
		}
		tx.commit().map_err(|err| Error::DbError(err.to_string()))?;

		debug!("redb storage adapter at {:?}", db_path.as_ref());
		Ok(StorageAdapterRedb { db: Arc::new(db) })
	}
}

impl std::fmt::Debug for StorageAdapterRedb {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StorageAdapterRedb").finish()
	}
}

#[async_trait]
impl StorageAdapter for StorageAdapterRedb {
	fn name(&self) -> &str {
		"redb"
	}

	async fn load(&self, key: &[String]) -> VelResult<Option<Vec<u8>>> {
		let encoded = encode_key(key);
		let tx = self.db.begin_read().map_err(|err| db_fault("load", err))?;
		let table = tx.open_table(TABLE_KV).map_err(|err| db_fault("load", err))?;
		let value = table
			.get(encoded.as_str())
			.map_err(|err| db_fault("load", err))?
			.map(|guard| guard.value().to_vec());
		Ok(value)
	}

	async fn save(&self, key: &[String], data: &[u8]) -> VelResult<()> {
		let encoded = encode_key(key);
		let tx = self.db.begin_write().map_err(|err| db_fault("save", err))?;
		{
			let mut table = tx.open_table(TABLE_KV).map_err(|err| db_fault("save", err))?;
			table
				.insert(encoded.as_str(), data)
				.map_err(|err| db_fault("save", err))?;
		}
		tx.commit().map_err(|err| db_fault("save", err))?;
		Ok(())
	}

	async fn remove(&self, key: &[String]) -> VelResult<()> {
		let encoded = encode_key(key);
		let tx = self.db.begin_write().map_err(|err| db_fault("remove", err))?;
		{
			let mut table = tx.open_table(TABLE_KV).map_err(|err| db_fault("remove", err))?;
			table
				.remove(encoded.as_str())
				.map_err(|err| db_fault("remove", err))?;
		}
		tx.commit().map_err(|err| db_fault("remove", err))?;
		Ok(())
	}

	async fn load_range(&self, prefix: &[String]) -> VelResult<Vec<StorageEntry>> {
		let tx = self.db.begin_read().map_err(|err| db_fault("load_range", err))?;
		let table = tx.open_table(TABLE_KV).map_err(|err| db_fault("load_range", err))?;
		let mut entries = Vec::new();
		for item in table.iter().map_err(|err| db_fault("load_range", err))? {
			let (key_guard, value_guard) = item.map_err(|err| db_fault("load_range", err))?;
			let Some(key) = decode_key(key_guard.value()) else { continue };
			if !key_has_prefix(&key, prefix) {
				continue;
			}
			entries.push(StorageEntry { key, data: value_guard.value().to_vec() });
		}
		entries.sort_by(|a, b| a.key.cmp(&b.key));
		Ok(entries)
	}

	async fn remove_range(&self, prefix: &[String]) -> VelResult<()> {
		let tx = self.db.begin_write().map_err(|err| db_fault("remove_range", err))?;
		{
			let mut table = tx.open_table(TABLE_KV).map_err(|err| db_fault("remove_range", err))?;
			let doomed: Vec<String> = {
				let mut keys = Vec::new();
				for item in table.iter().map_err(|err| db_fault("remove_range", err))? {
					let (key_guard, _) = item.map_err(|err| db_fault("remove_range", err))?;
					let encoded = key_guard.value().to_string();
					if let Some(key) = decode_key(&encoded) {
						if key_has_prefix(&key, prefix) {
							keys.push(encoded);
						}
					}
				}
				keys
			};
			for encoded in doomed {
				table
					.remove(encoded.as_str())
					.map_err(|err| db_fault("remove_range", err))?;
			}
		}
		tx.commit().map_err(|err| db_fault("remove_range", err))?;
		Ok(())
	}
}

fn db_fault(op: &str, err: impl std::fmt::Display) -> VelError {
	VelError::StorageFault(format!("{}: {}", op, err))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn key_encoding_round_trips() {
		let key = vec!["doc%1".to_string(), "update".to_string(), "A\u{1f}B".to_string()];
		assert_eq!(decode_key(&encode_key(&key)), Some(key));
	}
}

// vim: ts=4

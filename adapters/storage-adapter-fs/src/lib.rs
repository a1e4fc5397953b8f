//! Filesystem Storage Adapter
//!
//! Stores each entry as one file in a flat directory. Key components are
//! percent-escaped and joined with `~`, which keeps filenames portable and
//! makes lexicographic filename order match component order for the
//! version-tag alphabet. Saves go through a temp file plus rename so a
//! crashed process never leaves a half-written entry behind.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use vellum::error::{Error, VelResult};
use vellum::storage_adapter::{StorageAdapter, StorageEntry, key_has_prefix};

const COMPONENT_SEPARATOR: char = '~';

/// Escape one key component for use inside a filename. Keeps the URL-safe
/// base64 alphabet intact so version tags stay readable on disk.
fn escape_component(component: &str) -> String {
	let mut out = String::with_capacity(component.len());
	for byte in component.bytes() {
		match byte {
			b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'-' | b'.' => {
				out.push(byte as char);
			}
			_ => out.push_str(&format!("%{:02X}", byte)),
		}
	}
	out
}

fn unescape_component(component: &str) -> Option<String> {
	let mut bytes = Vec::with_capacity(component.len());
	let mut chars = component.bytes();
	while let Some(byte) = chars.next() {
		if byte == b'%' {
			let hi = chars.next()?;
			let lo = chars.next()?;
			let hex = [hi, lo];
			let hex = std::str::from_utf8(&hex).ok()?;
			bytes.push(u8::from_str_radix(hex, 16).ok()?);
		} else {
			bytes.push(byte);
		}
	}
	String::from_utf8(bytes).ok()
}

fn file_name(key: &[String]) -> String {
	key.iter()
		.map(|component| escape_component(component))
		.collect::<Vec<_>>()
		.join(&COMPONENT_SEPARATOR.to_string())
}

fn parse_file_name(name: &str) -> Option<Vec<String>> {
	name.split(COMPONENT_SEPARATOR).map(unescape_component).collect()
}

#[derive(Debug)]
pub struct StorageAdapterFs {
	base_dir: Box<Path>,
}

impl StorageAdapterFs {
	pub async fn new(base_dir: impl AsRef<Path>) -> VelResult<StorageAdapterFs> {
		let base_dir: Box<Path> = base_dir.as_ref().into();
		tokio::fs::create_dir_all(&base_dir).await?;
		debug!("fs storage adapter at {:?}", base_dir);
		Ok(StorageAdapterFs { base_dir })
	}

	fn path_for(&self, key: &[String]) -> PathBuf {
		self.base_dir.join(file_name(key))
	}
}

#[async_trait]
impl StorageAdapter for StorageAdapterFs {
	fn name(&self) -> &str {
		"fs"
	}

	async fn load(&self, key: &[String]) -> VelResult<Option<Vec<u8>>> {
		match tokio::fs::read(self.path_for(key)).await {
			Ok(data) => Ok(Some(data)),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(err) => Err(Error::StorageFault(format!("load: {}", err))),
		}
	}

	async fn save(&self, key: &[String], data: &[u8]) -> VelResult<()> {
		let path = self.path_for(key);
		let tmp = self.base_dir.join(format!(".tmp-{}", file_name(key)));
		let mut file = tokio::fs::File::create(&tmp)
			.await
			.map_err(|err| Error::StorageFault(format!("save: {}", err)))?;
		file.write_all(data)
			.await
			.map_err(|err| Error::StorageFault(format!("save: {}", err)))?;
		file.sync_all()
			.await
			.map_err(|err| Error::StorageFault(format!("save: {}", err)))?;
		tokio::fs::rename(&tmp, &path)
			.await
			.map_err(|err| Error::StorageFault(format!("save: {}", err)))?;
		Ok(())
	}

	async fn remove(&self, key: &[String]) -> VelResult<()> {
		match tokio::fs::remove_file(self.path_for(key)).await {
			Ok(()) => Ok(()),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(err) => Err(Error::StorageFault(format!("remove: {}", err))),
		}
	}

	async fn load_range(&self, prefix: &[String]) -> VelResult<Vec<StorageEntry>> {
		let mut entries = Vec::new();
		let mut dir = tokio::fs::read_dir(&self.base_dir)
			.await
			.map_err(|err| Error::StorageFault(format!("load_range: {}", err)))?;
		while let Some(file) = dir
			.next_entry()
			.await
			.map_err(|err| Error::StorageFault(format!("load_range: {}", err)))?
		{
			let name = file.file_name();
			let Some(name) = name.to_str() else { continue };
			if name.starts_with(".tmp-") {
				continue;
			}
			let Some(key) = parse_file_name(name) else { continue };
			if !key_has_prefix(&key, prefix) {
				continue;
			}
			let data = tokio::fs::read(file.path())
				.await
				.map_err(|err| Error::StorageFault(format!("load_range: {}", err)))?;
			entries.push(StorageEntry { key, data });
		}
		entries.sort_by(|a, b| a.key.cmp(&b.key));
		Ok(entries)
	}

	async fn remove_range(&self, prefix: &[String]) -> VelResult<()> {
		let mut dir = tokio::fs::read_dir(&self.base_dir)
			.await
			.map_err(|err| Error::StorageFault(format!("remove_range: {}", err)))?;
		while let Some(file) = dir
			.next_entry()
			.await
			.map_err(|err| Error::StorageFault(format!("remove_range: {}", err)))?
		{
			let name = file.file_name();
			let Some(name) = name.to_str() else { continue };
			let Some(key) = parse_file_name(name) else { continue };
			if !key_has_prefix(&key, prefix) {
				continue;
			}
			match tokio::fs::remove_file(file.path()).await {
				Ok(()) => {}
				Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
				Err(err) => return Err(Error::StorageFault(format!("remove_range: {}", err))),
			}
		}
		Ok(())
	}
}


// vim: ts=4

//! In-process TTL cache with one namespace per fetch tier.

use std::{
	collections::{BTreeMap, HashMap},
	sync::{Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
	List,
	Preview,
	Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
	pub hits: u64,
	pub misses: u64,
	pub entries: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
	pub namespaces: BTreeMap<Namespace, NamespaceStats>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
	pub enabled: bool,
	pub list_ttl: Duration,
	pub preview_ttl: Duration,
	pub full_ttl: Duration,
	pub max_payload_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
struct Entry {
	value: Value,
	inserted_at: OffsetDateTime,
	expires_at: OffsetDateTime,
}

#[derive(Debug, Default)]
struct Inner {
	entries: HashMap<(Namespace, String), Entry>,
	counters: BTreeMap<Namespace, (u64, u64)>,
}

#[derive(Debug)]
pub struct NotionCache {
	settings: CacheSettings,
	inner: Mutex<Inner>,
}

impl Namespace {
	pub const ALL: [Namespace; 3] = [Namespace::List, Namespace::Preview, Namespace::Full];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::List => "list",
			Self::Preview => "preview",
			Self::Full => "full",
		}
	}
}

impl From<&gdd_config::Cache> for CacheSettings {
	fn from(cfg: &gdd_config::Cache) -> Self {
		Self {
			enabled: cfg.enabled,
			list_ttl: Duration::seconds(cfg.list_ttl_secs),
			preview_ttl: Duration::seconds(cfg.preview_ttl_secs),
			full_ttl: Duration::seconds(cfg.full_ttl_secs),
			max_payload_bytes: cfg.max_payload_bytes,
		}
	}
}

impl CacheStats {
	pub fn total_entries(&self) -> usize {
		self.namespaces.values().map(|stats| stats.entries).sum()
	}
}

impl NotionCache {
	pub fn new(settings: CacheSettings) -> Self {
		Self { settings, inner: Mutex::new(Inner::default()) }
	}

	pub fn from_config(cfg: &gdd_config::Cache) -> Self {
		Self::new(CacheSettings::from(cfg))
	}

	pub fn ttl(&self, namespace: Namespace) -> Duration {
		match namespace {
			Namespace::List => self.settings.list_ttl,
			Namespace::Preview => self.settings.preview_ttl,
			Namespace::Full => self.settings.full_ttl,
		}
	}

	pub fn get<T>(&self, namespace: Namespace, key: &str) -> Option<T>
	where
		T: DeserializeOwned,
	{
		self.get_at(namespace, key, OffsetDateTime::now_utc())
	}

	/// Returns the cached value unless it is expired or no longer decodes as `T`; either case
	/// drops the entry.
	pub fn get_at<T>(&self, namespace: Namespace, key: &str, now: OffsetDateTime) -> Option<T>
	where
		T: DeserializeOwned,
	{
		let mut inner = self.lock();
		let map_key = (namespace, key.to_string());
		let value = match inner.entries.get(&map_key) {
			Some(entry) if entry.expires_at > now =>
				Some((entry.value.clone(), (now - entry.inserted_at).whole_seconds())),
			_ => None,
		};
		let age_secs = value.as_ref().map(|(_, age)| *age);
		let decoded = value.and_then(|(value, _)| match serde_json::from_value::<T>(value) {
			Ok(decoded) => Some(decoded),
			Err(err) => {
				tracing::warn!(
					namespace = namespace.as_str(),
					key,
					error = %err,
					"Dropping undecodable cache entry."
				);

				None
			},
		});

		if decoded.is_none() {
			inner.entries.remove(&map_key);
		}

		let counters = inner.counters.entry(namespace).or_default();

		if decoded.is_some() {
			counters.0 += 1;

			tracing::debug!(namespace = namespace.as_str(), key, age_secs, "Cache hit.");
		} else {
			counters.1 += 1;

			tracing::debug!(namespace = namespace.as_str(), key, "Cache miss.");
		}

		decoded
	}

	pub fn put<T>(&self, namespace: Namespace, key: &str, value: &T) -> bool
	where
		T: Serialize,
	{
		self.put_at(namespace, key, value, OffsetDateTime::now_utc())
	}

	/// Stores `value` and reports whether it was kept.
	pub fn put_at<T>(&self, namespace: Namespace, key: &str, value: &T, now: OffsetDateTime) -> bool
	where
		T: Serialize,
	{
		if !self.settings.enabled {
			return false;
		}

		let value = match serde_json::to_value(value) {
			Ok(value) => value,
			Err(err) => {
				tracing::warn!(
					namespace = namespace.as_str(),
					key,
					error = %err,
					"Value is not cacheable."
				);

				return false;
			},
		};

		if let Some(limit) = self.settings.max_payload_bytes {
			let size =
				serde_json::to_vec(&value).map(|bytes| bytes.len() as u64).unwrap_or(u64::MAX);

			if size > limit {
				tracing::debug!(
					namespace = namespace.as_str(),
					key,
					size,
					limit,
					"Payload too large to cache."
				);

				return false;
			}
		}

		// A TTL past the representable range never expires.
		let expires_at =
			now.checked_add(self.ttl(namespace)).unwrap_or(PrimitiveDateTime::MAX.assume_utc());
		let entry = Entry { value, inserted_at: now, expires_at };

		self.lock().entries.insert((namespace, key.to_string()), entry);

		true
	}

	pub fn invalidate(&self, namespace: Namespace, key: &str) -> bool {
		self.lock().entries.remove(&(namespace, key.to_string())).is_some()
	}

	/// Drops the preview and full entries of one page.
	pub fn invalidate_page(&self, page_id: &str) -> usize {
		let mut inner = self.lock();

		[Namespace::Preview, Namespace::Full]
			.into_iter()
			.filter(|namespace| inner.entries.remove(&(*namespace, page_id.to_string())).is_some())
			.count()
	}

	/// Drops every list entry of one database, whatever filter it was queried with.
	pub fn invalidate_database(&self, database_id: &str) -> usize {
		let prefix = format!("{database_id}:");
		let mut inner = self.lock();
		let before = inner.entries.len();

		inner.entries.retain(|(namespace, key), _| {
			!(*namespace == Namespace::List && key.starts_with(&prefix))
		});

		before - inner.entries.len()
	}

	pub fn clear_namespace(&self, namespace: Namespace) -> usize {
		let mut inner = self.lock();
		let before = inner.entries.len();

		inner.entries.retain(|(entry_namespace, _), _| *entry_namespace != namespace);

		before - inner.entries.len()
	}

	pub fn clear(&self) {
		self.lock().entries.clear();
	}

	pub fn purge_expired(&self) -> usize {
		self.purge_expired_at(OffsetDateTime::now_utc())
	}

	pub fn purge_expired_at(&self, now: OffsetDateTime) -> usize {
		let mut inner = self.lock();
		let before = inner.entries.len();

		inner.entries.retain(|_, entry| entry.expires_at > now);

		before - inner.entries.len()
	}

	pub fn stats(&self) -> CacheStats {
		let inner = self.lock();
		let mut stats = CacheStats::default();

		for namespace in Namespace::ALL {
			let (hits, misses) = inner.counters.get(&namespace).copied().unwrap_or_default();
			let entries = inner.entries.keys().filter(|(ns, _)| *ns == namespace).count();

			stats.namespaces.insert(namespace, NamespaceStats { hits, misses, entries });
		}

		stats
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Key of a database query in the list namespace: the database id followed by a blake3 digest of
/// the query.
pub fn list_key(database_id: &str, filter: Option<&Value>) -> String {
	let payload = serde_json::json!({ "database_id": database_id, "filter": filter });
	let digest = blake3::hash(payload.to_string().as_bytes());

	format!("{database_id}:{}", digest.to_hex())
}

//! Persistent user preferences.
//!
//! A small typed key-value store: WiFi credentials plus a handful of
//! device settings. The medium sits behind [`StoreBackend`]; on the
//! device it is the ESP32-S3 internal flash via `sequential-storage`,
//! in tests a RAM map.
//!
//! Every operation locks the store. Grouped operations use a [`Batch`],
//! which holds the lock across several reads/writes; batches nest, and
//! the lock is released when the outermost one is dropped.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use heapless::{LinearMap, String};

use crate::config::{
    DEFAULT_BRIGHTNESS, DEFAULT_LANGUAGE, DEFAULT_LED_COLOR, DEFAULT_THEME, PREF_KEY_COUNT,
    PREF_VALUE_LEN,
};
use crate::error::{Error, Result};
use crate::net::Credentials;

pub type PrefValue = String<PREF_VALUE_LEN>;

/// Every stored setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PrefKey {
    WifiSsid,
    WifiPassword,
    Brightness,
    LedColor,
    Language,
    Theme,
}

impl PrefKey {
    pub const ALL: [PrefKey; PREF_KEY_COUNT] = [
        PrefKey::WifiSsid,
        PrefKey::WifiPassword,
        PrefKey::Brightness,
        PrefKey::LedColor,
        PrefKey::Language,
        PrefKey::Theme,
    ];

    /// Stable on-flash key id. Never renumber.
    pub const fn id(self) -> u8 {
        match self {
            PrefKey::WifiSsid => 0x01,
            PrefKey::WifiPassword => 0x02,
            PrefKey::Brightness => 0x10,
            PrefKey::LedColor => 0x11,
            PrefKey::Language => 0x12,
            PrefKey::Theme => 0x13,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PrefKey::WifiSsid => "wifi_ssid",
            PrefKey::WifiPassword => "wifi_password",
            PrefKey::Brightness => "conf.brightness",
            PrefKey::LedColor => "conf.ledColor",
            PrefKey::Language => "conf.lang",
            PrefKey::Theme => "conf.theme",
        }
    }

    /// Value written on first boot, if the key has one.
    pub const fn default_value(self) -> Option<&'static str> {
        match self {
            PrefKey::Brightness => Some(DEFAULT_BRIGHTNESS),
            PrefKey::LedColor => Some(DEFAULT_LED_COLOR),
            PrefKey::Language => Some(DEFAULT_LANGUAGE),
            PrefKey::Theme => Some(DEFAULT_THEME),
            PrefKey::WifiSsid | PrefKey::WifiPassword => None,
        }
    }
}

/// Storage medium for preferences.
#[allow(async_fn_in_trait)]
pub trait StoreBackend {
    async fn load(&mut self, key: PrefKey) -> Result<Option<PrefValue>>;

    async fn store(&mut self, key: PrefKey, value: &str) -> Result<()>;

    async fn remove(&mut self, key: PrefKey) -> Result<()>;

    /// Drop every stored value.
    async fn erase_all(&mut self) -> Result<()>;
}

struct Shared<S> {
    backend: S,
    depth: u8,
}

/// Mutex-guarded preference store.
pub struct Preferences<S> {
    inner: Mutex<CriticalSectionRawMutex, Shared<S>>,
}

impl<S: StoreBackend> Preferences<S> {
    pub const fn new(backend: S) -> Self {
        Self {
            inner: Mutex::new(Shared { backend, depth: 0 }),
        }
    }

    /// Lock the store for several operations.
    pub async fn batch(&self) -> Batch<'_, S> {
        Batch::open(Held::Owned(self.inner.lock().await))
    }

    /// Stored value, or `None` if absent or unreadable.
    pub async fn get(&self, key: PrefKey) -> Option<PrefValue> {
        self.batch().await.get(key).await
    }

    pub async fn put(&self, key: PrefKey, value: &str) -> Result<()> {
        self.batch().await.put(key, value).await
    }

    /// Write defaults for every setting that has never been stored.
    pub async fn init_defaults(&self) -> Result<()> {
        let mut batch = self.batch().await;
        for key in PrefKey::ALL {
            let Some(default) = key.default_value() else {
                continue;
            };
            if batch.get(key).await.is_none() {
                debug!("Prefs: default {} = {}", key.name(), default);
                batch.put(key, default).await?;
            }
        }
        Ok(())
    }

    /// Saved WiFi credentials; both SSID and password must be present.
    pub async fn wifi_credentials(&self) -> Option<Credentials> {
        let mut batch = self.batch().await;
        let ssid = batch.get(PrefKey::WifiSsid).await?;
        let password = batch.get(PrefKey::WifiPassword).await?;
        if password.is_empty() {
            return None;
        }
        Credentials::new(&ssid, &password)
    }

    pub async fn save_wifi_credentials(&self, credentials: &Credentials) -> Result<()> {
        let mut batch = self.batch().await;
        batch.put(PrefKey::WifiSsid, &credentials.ssid).await?;
        batch.put(PrefKey::WifiPassword, &credentials.password).await?;
        info!("Prefs: saved WiFi credentials for {}", credentials.ssid.as_str());
        Ok(())
    }

    /// Factory reset: erase everything, including WiFi credentials.
    pub async fn clear_all(&self) -> Result<()> {
        let mut batch = self.batch().await;
        batch.shared().backend.erase_all().await?;
        warn!("Prefs: all preferences cleared");
        Ok(())
    }
}

enum Held<'a, S> {
    Owned(MutexGuard<'a, CriticalSectionRawMutex, Shared<S>>),
    Nested(&'a mut Shared<S>),
}

/// Exclusive access to the store for the lifetime of the value.
pub struct Batch<'a, S> {
    held: Held<'a, S>,
}

impl<'a, S: StoreBackend> Batch<'a, S> {
    fn open(held: Held<'a, S>) -> Self {
        let mut batch = Self { held };
        let shared = batch.shared();
        shared.depth = shared.depth.saturating_add(1);
        if shared.depth > 1 {
            trace!("Prefs: nested batch (depth {})", shared.depth);
        }
        batch
    }

    fn shared(&mut self) -> &mut Shared<S> {
        match &mut self.held {
            Held::Owned(guard) => guard,
            Held::Nested(shared) => shared,
        }
    }

    /// Open a nested batch that reuses this batch's lock.
    pub fn nested(&mut self) -> Batch<'_, S> {
        Batch::open(Held::Nested(self.shared()))
    }

    /// Current nesting depth (1 for an outermost batch).
    pub fn depth(&mut self) -> u8 {
        self.shared().depth
    }

    pub async fn get(&mut self, key: PrefKey) -> Option<PrefValue> {
        match self.shared().backend.load(key).await {
            Ok(v) => v,
            Err(e) => {
                error!("Prefs: read {} failed: {:?}", key.name(), e);
                None
            }
        }
    }

    pub async fn put(&mut self, key: PrefKey, value: &str) -> Result<()> {
        if value.len() > PREF_VALUE_LEN {
            return Err(Error::BufferOverflow);
        }
        self.shared().backend.store(key, value).await
    }

    pub async fn remove(&mut self, key: PrefKey) -> Result<()> {
        self.shared().backend.remove(key).await
    }
}

impl<S> Drop for Batch<'_, S> {
    fn drop(&mut self) {
        let shared: &mut Shared<S> = match &mut self.held {
            Held::Owned(guard) => guard,
            Held::Nested(shared) => shared,
        };
        shared.depth = shared.depth.saturating_sub(1);
    }
}

/// Volatile backend; used in tests and when flash is unavailable.
#[derive(Default)]
pub struct RamBackend {
    values: LinearMap<u8, PrefValue, PREF_KEY_COUNT>,
    writes: usize,
}

impl RamBackend {
    pub const fn new() -> Self {
        Self {
            values: LinearMap::new(),
            writes: 0,
        }
    }

    /// Number of store/remove/erase operations performed.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl StoreBackend for RamBackend {
    async fn load(&mut self, key: PrefKey) -> Result<Option<PrefValue>> {
        Ok(self.values.get(&key.id()).cloned())
    }

    async fn store(&mut self, key: PrefKey, value: &str) -> Result<()> {
        let v = PrefValue::try_from(value).map_err(|_| Error::BufferOverflow)?;
        self.values
            .insert(key.id(), v)
            .map_err(|_| Error::Storage)?;
        self.writes += 1;
        Ok(())
    }

    async fn remove(&mut self, key: PrefKey) -> Result<()> {
        self.values.remove(&key.id());
        self.writes += 1;
        Ok(())
    }

    async fn erase_all(&mut self) -> Result<()> {
        self.values.clear();
        self.writes += 1;
        Ok(())
    }
}

impl<S: StoreBackend> Preferences<S> {
    /// Run `f` against the raw backend (diagnostics and tests).
    pub async fn with_backend<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut batch = self.batch().await;
        f(&mut batch.shared().backend)
    }
}

#[cfg(feature = "embedded")]
pub use flash::FlashBackend;

#[cfg(feature = "embedded")]
mod flash {
    use core::ops::Range;

    use embedded_storage_async::nor_flash::NorFlash;
    use sequential_storage::cache::NoCache;

    use super::{PrefKey, PrefValue, StoreBackend};
    use crate::config::{PREF_VALUE_LEN, STORAGE_FLASH_SIZE, STORAGE_FLASH_START};
    use crate::error::{Error, Result};

    /// Scratch buffer: item header + key + value, rounded up.
    const ITEM_BUF_SIZE: usize = PREF_VALUE_LEN + 32;

    /// Preferences on internal flash via a `sequential-storage` map.
    pub struct FlashBackend<F> {
        flash: F,
        range: Range<u32>,
    }

    impl<F: NorFlash> FlashBackend<F> {
        pub fn new(flash: F) -> Self {
            Self {
                flash,
                range: STORAGE_FLASH_START..STORAGE_FLASH_START + STORAGE_FLASH_SIZE,
            }
        }
    }

    impl<F: NorFlash> StoreBackend for FlashBackend<F> {
        async fn load(&mut self, key: PrefKey) -> Result<Option<PrefValue>> {
            let mut buf = [0u8; ITEM_BUF_SIZE];
            let item = sequential_storage::map::fetch_item::<u8, &[u8], _>(
                &mut self.flash,
                self.range.clone(),
                &mut NoCache::new(),
                &mut buf,
                &key.id(),
            )
            .await
            .map_err(|e| {
                error!("Flash read error: {:?}", defmt::Debug2Format(&e));
                Error::Storage
            })?;

            match item {
                Some(bytes) => {
                    let s = core::str::from_utf8(bytes).map_err(|_| Error::CorruptValue)?;
                    PrefValue::try_from(s).map(Some).map_err(|_| Error::CorruptValue)
                }
                None => Ok(None),
            }
        }

        async fn store(&mut self, key: PrefKey, value: &str) -> Result<()> {
            let mut buf = [0u8; ITEM_BUF_SIZE];
            sequential_storage::map::store_item::<u8, &[u8], _>(
                &mut self.flash,
                self.range.clone(),
                &mut NoCache::new(),
                &mut buf,
                &key.id(),
                &value.as_bytes(),
            )
            .await
            .map_err(|e| {
                error!("Flash write error: {:?}", defmt::Debug2Format(&e));
                Error::Storage
            })
        }

        async fn remove(&mut self, key: PrefKey) -> Result<()> {
            let mut buf = [0u8; ITEM_BUF_SIZE];
            sequential_storage::map::remove_item::<u8, _>(
                &mut self.flash,
                self.range.clone(),
                &mut NoCache::new(),
                &mut buf,
                &key.id(),
            )
            .await
            .map_err(|e| {
                error!("Flash remove error: {:?}", defmt::Debug2Format(&e));
                Error::Storage
            })
        }

        async fn erase_all(&mut self) -> Result<()> {
            sequential_storage::erase_all(&mut self.flash, self.range.clone())
                .await
                .map_err(|e| {
                    error!("Flash erase error: {:?}", defmt::Debug2Format(&e));
                    Error::Storage
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn missing_key_is_none() {
        let prefs = Preferences::new(RamBackend::new());
        assert_eq!(block_on(prefs.get(PrefKey::Theme)), None);
    }

    #[test]
    fn put_then_get() {
        let prefs = Preferences::new(RamBackend::new());
        block_on(prefs.put(PrefKey::LedColor, "violet")).unwrap();
        assert_eq!(block_on(prefs.get(PrefKey::LedColor)).as_deref(), Some("violet"));
    }

    #[test]
    fn oversized_value_rejected() {
        let prefs = Preferences::new(RamBackend::new());
        let long = "x".repeat(PREF_VALUE_LEN + 1);
        assert_eq!(block_on(prefs.put(PrefKey::Theme, &long)), Err(Error::BufferOverflow));
    }

    #[test]
    fn defaults_written_once() {
        let prefs = Preferences::new(RamBackend::new());
        block_on(prefs.put(PrefKey::LedColor, "red")).unwrap();
        block_on(prefs.init_defaults()).unwrap();

        assert_eq!(block_on(prefs.get(PrefKey::Brightness)).as_deref(), Some("80"));
        assert_eq!(block_on(prefs.get(PrefKey::Language)).as_deref(), Some("it"));
        assert_eq!(block_on(prefs.get(PrefKey::Theme)).as_deref(), Some("light"));
        // Existing value untouched.
        assert_eq!(block_on(prefs.get(PrefKey::LedColor)).as_deref(), Some("red"));
        assert_eq!(block_on(prefs.get(PrefKey::WifiSsid)), None);

        let writes = block_on(prefs.with_backend(|b| b.writes()));
        block_on(prefs.init_defaults()).unwrap();
        assert_eq!(block_on(prefs.with_backend(|b| b.writes())), writes);
    }

    #[test]
    fn wifi_credentials_need_both_fields() {
        let prefs = Preferences::new(RamBackend::new());
        assert!(block_on(prefs.wifi_credentials()).is_none());
        block_on(prefs.put(PrefKey::WifiSsid, "home")).unwrap();
        assert!(block_on(prefs.wifi_credentials()).is_none());
        block_on(prefs.put(PrefKey::WifiPassword, "hunter22")).unwrap();
        let creds = block_on(prefs.wifi_credentials()).unwrap();
        assert_eq!(creds, Credentials::new("home", "hunter22").unwrap());
    }

    #[test]
    fn save_credentials_roundtrip() {
        let prefs = Preferences::new(RamBackend::new());
        let creds = Credentials::new("office", "correct horse").unwrap();
        block_on(prefs.save_wifi_credentials(&creds)).unwrap();
        assert_eq!(block_on(prefs.wifi_credentials()), Some(creds));
    }

    #[test]
    fn clear_all_removes_everything() {
        let prefs = Preferences::new(RamBackend::new());
        block_on(prefs.init_defaults()).unwrap();
        block_on(prefs.save_wifi_credentials(&Credentials::new("a", "b").unwrap())).unwrap();
        block_on(prefs.clear_all()).unwrap();
        for key in PrefKey::ALL {
            assert_eq!(block_on(prefs.get(key)), None);
        }
    }

    #[test]
    fn batches_nest_and_release() {
        let prefs = Preferences::new(RamBackend::new());
        block_on(async {
            let mut outer = prefs.batch().await;
            assert_eq!(outer.depth(), 1);
            {
                let mut inner = outer.nested();
                assert_eq!(inner.depth(), 2);
                inner.put(PrefKey::Theme, "dark").await.unwrap();
            }
            assert_eq!(outer.depth(), 1);
            assert_eq!(outer.get(PrefKey::Theme).await.as_deref(), Some("dark"));
            // Lock is held while the batch lives.
            assert!(prefs.inner.try_lock().is_err());
        });
        // Released after the outermost batch drops.
        let mut again = block_on(prefs.batch());
        assert_eq!(again.depth(), 1);
    }

    #[test]
    fn remove_single_key() {
        let prefs = Preferences::new(RamBackend::new());
        block_on(async {
            prefs.put(PrefKey::Theme, "dark").await.unwrap();
            prefs.batch().await.remove(PrefKey::Theme).await.unwrap();
            assert_eq!(prefs.get(PrefKey::Theme).await, None);
        });
    }
}

//! Shared fixtures for the integration suite: in-memory repositories and a
//! pre-wired service harness over the in-process shared store.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use piazza::application::flash_sale::FlashSaleService;
use piazza::application::repos::{OrdersRepo, RepoError, ShopsRepo, VouchersRepo};
use piazza::application::shops::ShopService;
use piazza::application::worker::{OrderWorker, WorkerConfig};
use piazza::cache::{CacheClient, CacheConfig, keys};
use piazza::domain::entities::{FlashSaleVoucherRecord, ShopRecord, VoucherOrderRecord};
use piazza::infra::ids::IdGenerator;
use piazza::infra::store::{MemoryStore, SharedStore};

/// In-memory stand-in for the relational store. One mutex guards all rows,
/// so each repository call is atomic the way a single SQL statement is.
#[derive(Default)]
pub struct MemoryRepos {
    shops: Mutex<Vec<ShopRecord>>,
    vouchers: Mutex<Vec<FlashSaleVoucherRecord>>,
    orders: Mutex<Vec<VoucherOrderRecord>>,
    pub shop_lookups: AtomicUsize,
    pub voucher_lookups: AtomicUsize,
}

impl MemoryRepos {
    pub fn add_shop(&self, shop: ShopRecord) {
        self.shops.lock().unwrap().push(shop);
    }

    pub fn orders(&self) -> Vec<VoucherOrderRecord> {
        self.orders.lock().unwrap().clone()
    }

    pub fn voucher_stock(&self, voucher_id: u64) -> Option<i32> {
        self.vouchers
            .lock()
            .unwrap()
            .iter()
            .find(|voucher| voucher.id == voucher_id)
            .map(|voucher| voucher.stock)
    }
}

#[async_trait]
impl ShopsRepo for MemoryRepos {
    async fn find_by_id(&self, id: u64) -> Result<Option<ShopRecord>, RepoError> {
        self.shop_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .shops
            .lock()
            .unwrap()
            .iter()
            .find(|shop| shop.id == id)
            .cloned())
    }

    async fn update(&self, shop: &ShopRecord) -> Result<(), RepoError> {
        let mut shops = self.shops.lock().unwrap();
        match shops.iter_mut().find(|row| row.id == shop.id) {
            Some(row) => {
                *row = shop.clone();
                Ok(())
            }
            None => Err(RepoError::NotFound),
        }
    }
}

#[async_trait]
impl VouchersRepo for MemoryRepos {
    async fn find_by_id(&self, id: u64) -> Result<Option<FlashSaleVoucherRecord>, RepoError> {
        self.voucher_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .vouchers
            .lock()
            .unwrap()
            .iter()
            .find(|voucher| voucher.id == id)
            .cloned())
    }

    async fn insert(&self, voucher: &FlashSaleVoucherRecord) -> Result<(), RepoError> {
        let mut vouchers = self.vouchers.lock().unwrap();
        if vouchers.iter().any(|row| row.id == voucher.id) {
            return Err(RepoError::Duplicate {
                constraint: "flash_sale_voucher_pkey".to_string(),
            });
        }
        vouchers.push(voucher.clone());
        Ok(())
    }

    async fn decrement_stock(&self, voucher_id: u64) -> Result<bool, RepoError> {
        let mut vouchers = self.vouchers.lock().unwrap();
        match vouchers.iter_mut().find(|row| row.id == voucher_id) {
            Some(row) if row.stock > 0 => {
                row.stock -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl OrdersRepo for MemoryRepos {
    async fn count_for_user_and_voucher(
        &self,
        user_id: u64,
        voucher_id: u64,
    ) -> Result<u64, RepoError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .filter(|order| order.user_id == user_id && order.voucher_id == voucher_id)
            .count() as u64)
    }

    async fn insert_if_absent(&self, order: &VoucherOrderRecord) -> Result<bool, RepoError> {
        let mut orders = self.orders.lock().unwrap();
        let duplicate = orders
            .iter()
            .any(|row| row.user_id == order.user_id && row.voucher_id == order.voucher_id);
        if duplicate {
            return Ok(false);
        }
        orders.push(order.clone());
        Ok(true)
    }
}

pub fn shop(id: u64, name: &str) -> ShopRecord {
    ShopRecord {
        id,
        name: name.to_string(),
        address: "12 Harbor Lane".to_string(),
        score: 47,
        updated_at: OffsetDateTime::now_utc(),
    }
}

pub fn voucher(id: u64, stock: i32) -> FlashSaleVoucherRecord {
    let now = OffsetDateTime::now_utc();
    FlashSaleVoucherRecord {
        id,
        shop_id: 1,
        title: "Two-for-one tasting menu".to_string(),
        stock,
        begin_time: now,
        end_time: now + Duration::from_secs(3600),
    }
}

/// Everything a scenario needs, wired the way `main` wires production.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub repos: Arc<MemoryRepos>,
    pub cache: CacheClient,
    pub shops: ShopService,
    pub flash_sale: FlashSaleService,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let shared: Arc<dyn SharedStore> = store.clone();
        let repos = Arc::new(MemoryRepos::default());

        let cache = CacheClient::new(shared.clone(), CacheConfig::default());
        let ids = IdGenerator::new(shared.clone());

        let shops = ShopService::new(cache.clone(), repos.clone());
        let flash_sale =
            FlashSaleService::new(shared.clone(), cache.clone(), ids, repos.clone());

        shared
            .create_group(keys::ORDER_STREAM, keys::ORDER_GROUP)
            .await
            .expect("consumer group");

        Self {
            store,
            repos,
            cache,
            shops,
            flash_sale,
        }
    }

    /// A worker with a short blocking read, tuned for test turnaround.
    pub fn worker(&self) -> OrderWorker {
        let config = WorkerConfig {
            block: Duration::from_millis(50),
            ..WorkerConfig::default()
        };
        OrderWorker::new(
            self.store.clone(),
            self.repos.clone(),
            self.repos.clone(),
            config,
        )
    }

    /// Polls until `predicate` holds or the deadline lapses.
    pub async fn wait_for<F>(&self, predicate: F, deadline: Duration) -> bool
    where
        F: Fn() -> bool,
    {
        let started = std::time::Instant::now();
        while started.elapsed() < deadline {
            if predicate() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        predicate()
    }
}

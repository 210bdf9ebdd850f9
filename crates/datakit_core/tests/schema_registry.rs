mod common;

use common::{
    open_session, Coupon, Customer, CustomerMapping, Order, OrderMapping, Price, PriceMapping,
    RejectingCouponMapping,
};
use datakit_core::schema::{is_schema_built, schema_for};
use datakit_core::{
    ConfigurationError, DataContext, DataError, DataResult, DescriptorCatalog, ErrorReporter,
    IgnoreList, ModelBuilder, Session, SessionOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static BROKEN_SHOP_REPORTS: AtomicUsize = AtomicUsize::new(0);

struct BrokenShopReporter;

impl ErrorReporter for BrokenShopReporter {
    fn on_mapping_error(&self, _err: &DataError) {
        BROKEN_SHOP_REPORTS.fetch_add(1, Ordering::SeqCst);
    }
}

struct BrokenShop;

impl DataContext for BrokenShop {
    fn register_descriptors(catalog: &mut DescriptorCatalog) {
        catalog
            .register::<CustomerMapping>()
            .register::<RejectingCouponMapping>()
            .register::<OrderMapping>()
            .register::<PriceMapping>();
    }

    fn error_reporter() -> Arc<dyn ErrorReporter> {
        Arc::new(BrokenShopReporter)
    }
}

#[test]
fn broken_descriptor_is_reported_once_and_skipped() {
    let model = schema_for::<BrokenShop>().unwrap();
    assert_eq!(model.len(), 3);
    assert_eq!(model.entity_names(), vec!["Customer", "Order", "Price"]);
    assert!(!model.contains::<Coupon>());
    assert_eq!(model.failures().len(), 1);
    assert!(model.failures()[0].message.contains("coupon mapping is not ready"));

    let again = schema_for::<BrokenShop>().unwrap();
    assert!(Arc::ptr_eq(&model, &again), "model must be built once");
    assert_eq!(BROKEN_SHOP_REPORTS.load(Ordering::SeqCst), 1);
}

#[test]
fn store_for_unmapped_entity_names_the_type() {
    let session = Session::open_in_memory::<BrokenShop>(&SessionOptions::default()).unwrap();
    let err = session.store::<Coupon>().err().unwrap();
    match err {
        DataError::Configuration(ConfigurationError::MissingMapping { entity }) => {
            assert_eq!(entity, "Coupon");
        }
        other => panic!("unexpected error: {other}"),
    }
}

struct FactoryFailure;

impl DataContext for FactoryFailure {
    fn register_descriptors(catalog: &mut DescriptorCatalog) {
        catalog
            .register_factory(|| -> DataResult<CustomerMapping> {
                Err(DataError::InvalidOperation("settings unavailable".to_string()))
            })
            .register::<PriceMapping>();
    }
}

#[test]
fn failing_descriptor_factory_is_skipped() {
    let model = schema_for::<FactoryFailure>().unwrap();
    assert!(!model.contains::<Customer>());
    assert!(model.contains::<Price>());
    assert_eq!(model.failures().len(), 1);
    assert!(model.failures()[0]
        .message
        .contains("could not be instantiated"));
}

struct IgnoresPrices;

impl DataContext for IgnoresPrices {
    fn register_descriptors(catalog: &mut DescriptorCatalog) {
        catalog
            .register::<CustomerMapping>()
            .register::<PriceMapping>();
    }

    fn ignore_entities(ignore: &mut IgnoreList) {
        ignore.ignore::<Price>();
    }
}

#[test]
fn ignored_entities_are_never_mapped() {
    let model = schema_for::<IgnoresPrices>().unwrap();
    assert!(model.contains::<Customer>());
    assert!(!model.contains::<Price>());
    assert!(model.failures().is_empty());
}

struct BaseIgnoresOrders;

impl DataContext for BaseIgnoresOrders {
    fn register_descriptors(catalog: &mut DescriptorCatalog) {
        catalog
            .register::<CustomerMapping>()
            .register::<OrderMapping>();
    }

    fn configure_base(model: &mut ModelBuilder) -> DataResult<()> {
        model.ignore::<Order>();
        Ok(())
    }
}

#[test]
fn base_step_runs_before_descriptors() {
    let model = schema_for::<BaseIgnoresOrders>().unwrap();
    assert_eq!(model.entity_names(), vec!["Customer"]);
    assert!(model.failures().is_empty());
}

static BROKEN_BASE_REPORTS: AtomicUsize = AtomicUsize::new(0);

struct BrokenBaseReporter;

impl ErrorReporter for BrokenBaseReporter {
    fn on_mapping_error(&self, _err: &DataError) {
        BROKEN_BASE_REPORTS.fetch_add(1, Ordering::SeqCst);
    }
}

struct BrokenBase;

impl DataContext for BrokenBase {
    fn register_descriptors(catalog: &mut DescriptorCatalog) {
        catalog.register::<CustomerMapping>();
    }

    fn configure_base(_model: &mut ModelBuilder) -> DataResult<()> {
        Err(DataError::InvalidOperation(
            "conventions missing".to_string(),
        ))
    }

    fn error_reporter() -> Arc<dyn ErrorReporter> {
        Arc::new(BrokenBaseReporter)
    }
}

#[test]
fn base_step_failure_is_reported_and_returned() {
    let err = schema_for::<BrokenBase>().unwrap_err();
    assert!(matches!(
        err,
        DataError::Configuration(ConfigurationError::BaseSchema(ref message))
            if message.contains("conventions missing")
    ));
    assert!(!is_schema_built::<BrokenBase>());
    assert_eq!(BROKEN_BASE_REPORTS.load(Ordering::SeqCst), 1);

    let session = Session::open_in_memory::<BrokenBase>(&SessionOptions::default()).unwrap();
    assert!(session.store::<Customer>().is_err());
}

struct Shop;

impl DataContext for Shop {
    fn register_descriptors(catalog: &mut DescriptorCatalog) {
        catalog
            .register::<OrderMapping>()
            .register::<CustomerMapping>();
    }
}

#[test]
fn ensure_created_creates_principal_tables_first() {
    let session = open_session::<Shop>();
    assert!(session.is_model_built());

    let mut stmt = session
        .connection()
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY rowid")
        .unwrap();
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(tables, vec!["customers", "orders"]);

    assert_eq!(session.ensure_created().unwrap(), 2, "creation is idempotent");
}

#[test]
fn mapping_exposes_configured_shape() {
    let model = schema_for::<Shop>().unwrap();
    let customers = model.mapping_for::<Customer>().unwrap();
    assert_eq!(customers.table, "customers");
    assert_eq!(customers.key, vec![0]);
    assert_eq!(customers.unique_indexes, vec![vec![2]]);
    assert!(customers.columns[1].required);
    assert_eq!(customers.columns[3].default_sql.as_deref(), Some("1"));

    let orders = model.mapping_for::<Order>().unwrap();
    assert_eq!(orders.foreign_keys.len(), 1);
    assert_eq!(orders.foreign_keys[0].principal_table, "customers");
    assert!(orders.foreign_keys[0].cascade_delete);
}

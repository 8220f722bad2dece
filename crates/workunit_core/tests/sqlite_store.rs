use std::sync::Arc;
use std::time::Duration;
use workunit_core::model::all_entities;
use workunit_core::{
    CommitContext, ContextError, Customer, EntityRef, Filter, Order, OrderStatus, SqliteStore,
    StoreConfig, StoreError, Tracked, UnitOfWork,
};

fn setup_with(config: StoreConfig) -> UnitOfWork<SqliteStore> {
    let store = SqliteStore::open_in_memory(config).unwrap();
    store.ensure_schema_for(&all_entities()).unwrap();
    UnitOfWork::new(Arc::new(store))
}

fn setup() -> UnitOfWork<SqliteStore> {
    setup_with(StoreConfig::default())
}

fn ctx() -> CommitContext {
    CommitContext::background()
}

fn count_rows(uow: &UnitOfWork<SqliteStore>, table: &str) -> i64 {
    uow.store()
        .with_connection(|conn| {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
                row.get(0)
            })
        })
        .unwrap()
}

fn persisted_customer(uow: &UnitOfWork<SqliteStore>, name: &str, email: &str) -> Tracked<Customer> {
    let customer = Tracked::new(Customer::new(name, email));
    uow.queue_create(&customer);
    uow.commit(&ctx()).unwrap();
    customer
}

#[test]
fn create_assigns_ids_visible_through_tracked_handle() {
    let uow = setup();
    let customer = Tracked::new(Customer::new("Ada", "ada@example.com"));
    uow.queue_create(&customer);
    assert_eq!(customer.id(), None);

    uow.commit(&ctx()).unwrap();

    let id = customer.id().unwrap();
    let loaded: Customer = uow.find_first(&ctx(), &Filter::by_id::<Customer>(id)).unwrap().unwrap();
    assert_eq!(loaded.name, "Ada");
    assert_eq!(loaded.email, "ada@example.com");
    assert!(loaded.created_at > 0);
    assert_eq!(loaded.created_at, loaded.updated_at);
}

#[test]
fn update_upserts_existing_row() {
    let uow = setup();
    let customer = persisted_customer(&uow, "Ada", "ada@example.com");
    let id = customer.id().unwrap();

    customer.update(|c| c.name = "Ada Lovelace".to_string());
    uow.queue_update(&customer);
    uow.commit(&ctx()).unwrap();

    let loaded: Customer = uow.find_first(&ctx(), &Filter::by_id::<Customer>(id)).unwrap().unwrap();
    assert_eq!(loaded.name, "Ada Lovelace");
    assert_eq!(count_rows(&uow, "customers"), 1);
}

#[test]
fn update_without_id_inserts() {
    let uow = setup();
    let customer = Tracked::new(Customer::new("Grace", "grace@example.com"));
    uow.queue_update(&customer);
    uow.commit(&ctx()).unwrap();

    assert!(customer.id().is_some());
    assert_eq!(count_rows(&uow, "customers"), 1);
}

#[test]
fn update_with_unknown_id_inserts_with_that_id() {
    let uow = setup();
    let mut customer = Customer::new("Grace", "grace@example.com");
    customer.id = Some(42);
    uow.queue_update(EntityRef::new(customer));
    uow.commit(&ctx()).unwrap();

    let loaded: Option<Customer> = uow.find_first(&ctx(), &Filter::by_id::<Customer>(42)).unwrap();
    assert_eq!(loaded.unwrap().name, "Grace");
}

#[test]
fn delete_by_entity_removes_only_that_row() {
    let uow = setup();
    let ada = persisted_customer(&uow, "Ada", "ada@example.com");
    persisted_customer(&uow, "Grace", "grace@example.com");

    uow.queue_delete(&ada);
    uow.commit(&ctx()).unwrap();

    assert_eq!(count_rows(&uow, "customers"), 1);
    let gone: Option<Customer> = uow
        .find_first(&ctx(), &Filter::by_id::<Customer>(ada.id().unwrap()))
        .unwrap();
    assert!(gone.is_none());
}

#[test]
fn delete_of_unsaved_entity_fails_with_missing_id() {
    let uow = setup();
    uow.queue_delete(EntityRef::new(Customer::new("Ada", "ada@example.com")));

    let err = uow.commit(&ctx()).unwrap_err();
    assert!(matches!(err, StoreError::MissingId { table: "customers" }));
    assert!(uow.has_pending());
}

#[test]
fn delete_matching_removes_every_matching_row() {
    let uow = setup();
    let customer = persisted_customer(&uow, "Ada", "ada@example.com");
    let customer_id = customer.id().unwrap();
    for amount in [10.0, 20.0, 30.0] {
        uow.queue_create(EntityRef::new(Order::new(customer_id, amount)));
    }
    let mut paid = Order::new(customer_id, 40.0);
    paid.status = OrderStatus::Paid;
    uow.queue_create(EntityRef::new(paid));
    uow.commit(&ctx()).unwrap();

    uow.queue_delete_matching(
        Filter::on::<Order>()
            .eq("customer_id", customer_id)
            .eq("status", OrderStatus::New.as_str().to_string()),
    );
    uow.commit(&ctx()).unwrap();

    let remaining: Option<Order> = uow
        .find_first(&ctx(), &Filter::on::<Order>().eq("customer_id", customer_id))
        .unwrap();
    assert_eq!(remaining.unwrap().status, OrderStatus::Paid);
    assert_eq!(count_rows(&uow, "orders"), 1);
}

#[test]
fn delete_matching_without_conditions_is_rejected() {
    let uow = setup();
    let customer = persisted_customer(&uow, "Ada", "ada@example.com");
    uow.queue_create(EntityRef::new(Order::new(customer.id().unwrap(), 10.0)));
    uow.commit(&ctx()).unwrap();

    uow.queue_delete_matching(Filter::on::<Order>());
    let err = uow.commit(&ctx()).unwrap_err();

    assert!(matches!(err, StoreError::UnboundedDelete { table: "orders" }));
    assert_eq!(count_rows(&uow, "orders"), 1);
}

#[test]
fn filter_on_unknown_column_is_rejected() {
    let uow = setup();
    uow.queue_delete_matching(Filter::on::<Order>().eq("colour", "red".to_string()));

    let err = uow.commit(&ctx()).unwrap_err();
    match err {
        StoreError::UnknownColumn { table, column } => {
            assert_eq!(table, "orders");
            assert_eq!(column, "colour");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn validation_failure_rolls_back_whole_batch() {
    let uow = setup();
    uow.queue_create(EntityRef::new(Customer::new("Ada", "ada@example.com")));
    uow.queue_create(EntityRef::new(Customer::new("  ", "blank@example.com")));

    let err = uow.commit(&ctx()).unwrap_err();

    match err {
        StoreError::Validation(validation) => assert_eq!(validation.field, "name"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(count_rows(&uow, "customers"), 0);
    assert_eq!(uow.pending_counts().creates, 2);
}

#[test]
fn order_for_missing_customer_violates_foreign_key() {
    let uow = setup();
    uow.queue_create(EntityRef::new(Order::new(999, 10.0)));

    let err = uow.commit(&ctx()).unwrap_err();

    assert!(err.is_constraint_violation());
    assert_eq!(count_rows(&uow, "orders"), 0);
}

#[test]
fn find_first_returns_lowest_id_match() {
    let uow = setup();
    let first = persisted_customer(&uow, "Twin", "one@example.com");
    persisted_customer(&uow, "Twin", "two@example.com");

    let loaded: Customer = uow
        .find_first(&ctx(), &Filter::on::<Customer>().eq("name", "Twin".to_string()))
        .unwrap()
        .unwrap();
    assert_eq!(loaded.id, first.id());

    let none: Option<Customer> = uow
        .find_first(&ctx(), &Filter::on::<Customer>().eq("name", "Nobody".to_string()))
        .unwrap();
    assert!(none.is_none());
}

#[test]
fn find_first_with_filter_for_other_table_is_rejected() {
    let uow = setup();
    let err = uow
        .find_first::<Customer>(&ctx(), &Filter::on::<Order>())
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::FilterMismatch {
            expected: "customers",
            actual: "orders"
        }
    ));
}

#[test]
fn preload_unknown_relation_is_rejected() {
    let uow = setup();
    let customer = persisted_customer(&uow, "Ada", "ada@example.com");

    let err = uow
        .preload_first::<Customer>(&ctx(), customer.id().unwrap(), &["invoices"])
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownRelation { table: "customers", .. }));
}

#[test]
fn cancelled_context_fails_before_touching_database() {
    let uow = setup();
    uow.queue_create(EntityRef::new(Customer::new("Ada", "ada@example.com")));
    let ctx = CommitContext::background();
    ctx.cancel_handle().cancel();

    let err = uow.commit(&ctx).unwrap_err();

    assert!(matches!(err, StoreError::Context(ContextError::Cancelled)));
    assert_eq!(count_rows(&uow, "customers"), 0);
    assert!(uow.has_pending());

    let lookup = uow.find_first::<Customer>(&ctx, &Filter::on::<Customer>());
    assert!(matches!(
        lookup,
        Err(StoreError::Context(ContextError::Cancelled))
    ));
}

#[test]
fn cancellation_inside_operation_rolls_back_earlier_writes() {
    let uow = setup_with(StoreConfig {
        progress_interval_ops: 1,
        ..StoreConfig::default()
    });
    let ctx = CommitContext::background();
    let cancel = ctx.cancel_handle();
    uow.queue_create(EntityRef::new(Customer::new("Ada", "ada@example.com")));
    uow.queue_operation(move |scope| {
        cancel.cancel();
        scope.create(EntityRef::new(Customer::new("Grace", "grace@example.com")))
    });

    let err = uow.commit(&ctx).unwrap_err();

    assert!(matches!(err, StoreError::Context(ContextError::Cancelled)));
    assert_eq!(count_rows(&uow, "customers"), 0);
}

#[test]
fn expired_deadline_reports_deadline_exceeded() {
    let uow = setup();
    uow.queue_create(EntityRef::new(Customer::new("Ada", "ada@example.com")));
    let ctx = CommitContext::with_timeout(Duration::ZERO);

    let err = uow.commit(&ctx).unwrap_err();

    assert!(matches!(
        err,
        StoreError::Context(ContextError::DeadlineExceeded)
    ));
    assert_eq!(count_rows(&uow, "customers"), 0);
}

#[test]
fn commit_hooks_observe_persisted_state() {
    let uow = Arc::new(setup());
    let customer = Tracked::new(Customer::new("Ada", "ada@example.com"));
    uow.queue_create(&customer);

    let seen = Arc::new(std::sync::Mutex::new(None));
    {
        let seen = Arc::clone(&seen);
        let customer = customer.clone();
        let uow_for_hook = Arc::clone(&uow);
        uow.on_committed(move || {
            let id = customer.id().unwrap();
            let loaded: Option<Customer> = uow_for_hook
                .find_first(&CommitContext::background(), &Filter::by_id::<Customer>(id))
                .unwrap();
            *seen.lock().unwrap() = loaded.map(|c| c.name);
        });
    }

    uow.commit(&ctx()).unwrap();
    assert_eq!(seen.lock().unwrap().as_deref(), Some("Ada"));
}

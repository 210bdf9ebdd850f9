#![allow(dead_code)]

use datakit_core::{
    DataContext, DataError, DataResult, Entity, EntityRow, EntityTypeBuilder, Field,
    MappingDescriptor, Session, SessionOptions, SqlType, UnitOfWork,
};
use rusqlite::types::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub tier: i64,
}

impl Customer {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            email: format!("{}@example.com", name.to_ascii_lowercase()),
            tier: 1,
        }
    }

    pub fn with_tier(mut self, tier: i64) -> Self {
        self.tier = tier;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomerField {
    Id,
    Name,
    Email,
    Tier,
}

impl Field for CustomerField {
    const ALL: &'static [Self] = &[Self::Id, Self::Name, Self::Email, Self::Tier];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Email => "email",
            Self::Tier => "tier",
        }
    }
}

impl Entity for Customer {
    type Field = CustomerField;

    fn value(&self, field: CustomerField) -> Value {
        match field {
            CustomerField::Id => Value::Integer(self.id),
            CustomerField::Name => Value::Text(self.name.clone()),
            CustomerField::Email => Value::Text(self.email.clone()),
            CustomerField::Tier => Value::Integer(self.tier),
        }
    }

    fn from_row(row: &EntityRow<'_, '_, CustomerField>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(CustomerField::Id)?,
            name: row.get(CustomerField::Name)?,
            email: row.get(CustomerField::Email)?,
            tier: row.get(CustomerField::Tier)?,
        })
    }
}

#[derive(Default)]
pub struct CustomerMapping;

impl MappingDescriptor for CustomerMapping {
    type Entity = Customer;

    fn configure(&self, builder: &mut EntityTypeBuilder<'_, Customer>) -> DataResult<()> {
        builder
            .to_table("customers")
            .has_key(&[CustomerField::Id])
            .has_unique_index(&[CustomerField::Email]);
        builder
            .property(CustomerField::Id)
            .has_column_type(SqlType::Integer);
        builder
            .property(CustomerField::Name)
            .has_column_type(SqlType::Text)
            .is_required();
        builder
            .property(CustomerField::Email)
            .has_column_type(SqlType::Text)
            .is_required();
        builder
            .property(CustomerField::Tier)
            .has_column_type(SqlType::Integer)
            .has_default_sql("1");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderField {
    Id,
    CustomerId,
    Note,
}

impl Field for OrderField {
    const ALL: &'static [Self] = &[Self::Id, Self::CustomerId, Self::Note];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::CustomerId => "customer_id",
            Self::Note => "note",
        }
    }
}

impl Entity for Order {
    type Field = OrderField;

    fn value(&self, field: OrderField) -> Value {
        match field {
            OrderField::Id => Value::Integer(self.id),
            OrderField::CustomerId => Value::Integer(self.customer_id),
            OrderField::Note => self.note.clone().map_or(Value::Null, Value::Text),
        }
    }

    fn from_row(row: &EntityRow<'_, '_, OrderField>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(OrderField::Id)?,
            customer_id: row.get(OrderField::CustomerId)?,
            note: row.get(OrderField::Note)?,
        })
    }
}

#[derive(Default)]
pub struct OrderMapping;

impl MappingDescriptor for OrderMapping {
    type Entity = Order;

    fn configure(&self, builder: &mut EntityTypeBuilder<'_, Order>) -> DataResult<()> {
        builder.to_table("orders").has_key(&[OrderField::Id]);
        builder
            .property(OrderField::CustomerId)
            .has_column_type(SqlType::Integer)
            .is_required();
        builder
            .has_foreign_key(&[OrderField::CustomerId], "customers", &["id"])
            .on_delete_cascade();
        Ok(())
    }
}

/// Entity with a composite key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Price {
    pub sku: String,
    pub region: String,
    pub cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceField {
    Sku,
    Region,
    Cents,
}

impl Field for PriceField {
    const ALL: &'static [Self] = &[Self::Sku, Self::Region, Self::Cents];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Sku => "sku",
            Self::Region => "region",
            Self::Cents => "cents",
        }
    }
}

impl Entity for Price {
    type Field = PriceField;

    fn value(&self, field: PriceField) -> Value {
        match field {
            PriceField::Sku => Value::Text(self.sku.clone()),
            PriceField::Region => Value::Text(self.region.clone()),
            PriceField::Cents => Value::Integer(self.cents),
        }
    }

    fn from_row(row: &EntityRow<'_, '_, PriceField>) -> rusqlite::Result<Self> {
        Ok(Self {
            sku: row.get(PriceField::Sku)?,
            region: row.get(PriceField::Region)?,
            cents: row.get(PriceField::Cents)?,
        })
    }
}

#[derive(Default)]
pub struct PriceMapping;

impl MappingDescriptor for PriceMapping {
    type Entity = Price;

    fn configure(&self, builder: &mut EntityTypeBuilder<'_, Price>) -> DataResult<()> {
        builder
            .to_table("prices")
            .has_key(&[PriceField::Sku, PriceField::Region]);
        Ok(())
    }
}

/// Entity whose only descriptor always fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coupon {
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CouponField {
    Code,
}

impl Field for CouponField {
    const ALL: &'static [Self] = &[Self::Code];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        "code"
    }
}

impl Entity for Coupon {
    type Field = CouponField;

    fn value(&self, _field: CouponField) -> Value {
        Value::Text(self.code.clone())
    }

    fn from_row(row: &EntityRow<'_, '_, CouponField>) -> rusqlite::Result<Self> {
        Ok(Self {
            code: row.get(CouponField::Code)?,
        })
    }
}

#[derive(Default)]
pub struct RejectingCouponMapping;

impl MappingDescriptor for RejectingCouponMapping {
    type Entity = Coupon;

    fn configure(&self, builder: &mut EntityTypeBuilder<'_, Coupon>) -> DataResult<()> {
        builder.to_table("coupons");
        Err(DataError::InvalidOperation(
            "coupon mapping is not ready".to_string(),
        ))
    }
}

/// Opens an in-memory session for `C` with every mapped table created.
pub fn open_session<C: DataContext>() -> Session {
    open_session_with::<C>(&SessionOptions::default())
}

pub fn open_session_with<C: DataContext>(options: &SessionOptions) -> Session {
    let session = Session::open_in_memory::<C>(options).unwrap();
    session.ensure_created().unwrap();
    session
}

/// Inserts and commits `customers` through a unit of work.
pub fn seed_customers(session: &Session, customers: &[Customer]) {
    let mut uow = UnitOfWork::new(session);
    uow.store::<Customer>().unwrap().insert_many(customers);
    let result = uow.commit();
    assert!(result.success(), "{}", result.message());
}

pub fn customers(count: i64) -> Vec<Customer> {
    (1..=count)
        .map(|id| Customer::new(id, &format!("Customer{id}")))
        .collect()
}

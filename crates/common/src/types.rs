use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Unique identifier of an order, assigned when the order is created.
    OrderId
);

uuid_id!(
    /// Identifier of the user who owns an order or payment.
    UserId
);

uuid_id!(
    /// Unique identifier of a captured payment.
    PaymentId
);

/// Product identifier as used by the inventory catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i64);

impl ProductId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ProductId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Money amount in integer minor-currency units (cents).
///
/// Serialized as a bare integer so it can travel inside event payloads
/// alongside producers that know nothing about this type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a new amount from minor units.
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in minor units.
    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies by a quantity, returning None on overflow.
    pub fn checked_mul(&self, quantity: i64) -> Option<Money> {
        self.0.checked_mul(quantity).map(Money)
    }

    /// Adds another amount, returning None on overflow.
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

/// Why an inventory reservation could not be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationFailureReason {
    /// A line item asked for more than is on hand.
    InsufficientStock,
    /// A line item names a product the catalogue does not carry.
    UnknownProduct,
}

impl ReservationFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationFailureReason::InsufficientStock => "insufficient_stock",
            ReservationFailureReason::UnknownProduct => "unknown_product",
        }
    }
}

impl std::fmt::Display for ReservationFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationFailureReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insufficient_stock" => Ok(ReservationFailureReason::InsufficientStock),
            "unknown_product" => Ok(ReservationFailureReason::UnknownProduct),
            other => Err(format!("unknown reservation failure reason: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_new_creates_unique_ids() {
        let id1 = OrderId::new();
        let id2 = OrderId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn order_id_parses_from_string() {
        let uuid = Uuid::new_v4();
        let id: OrderId = uuid.to_string().parse().unwrap();
        assert_eq!(id.as_uuid(), uuid);
        assert!("not-a-uuid".parse::<OrderId>().is_err());
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));

        let product = ProductId::new(1001);
        assert_eq!(serde_json::to_string(&product).unwrap(), "1001");
    }

    #[test]
    fn money_is_a_bare_integer_on_the_wire() {
        let money = Money::from_cents(200);
        assert_eq!(serde_json::to_string(&money).unwrap(), "200");
        let back: Money = serde_json::from_str("200").unwrap();
        assert_eq!(back, money);
    }

    #[test]
    fn money_checked_arithmetic() {
        let price = Money::from_cents(100);
        assert_eq!(price.checked_mul(2), Some(Money::from_cents(200)));
        assert_eq!(Money::from_cents(i64::MAX).checked_mul(2), None);
        assert_eq!(
            price.checked_add(Money::from_cents(50)),
            Some(Money::from_cents(150))
        );
    }

    #[test]
    fn money_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "$12.34");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-$12.34");
    }

    #[test]
    fn failure_reason_round_trips_through_str() {
        let reason: ReservationFailureReason = "insufficient_stock".parse().unwrap();
        assert_eq!(reason, ReservationFailureReason::InsufficientStock);
        assert_eq!(
            serde_json::to_string(&ReservationFailureReason::UnknownProduct).unwrap(),
            "\"unknown_product\""
        );
        assert!("sold_out".parse::<ReservationFailureReason>().is_err());
    }
}

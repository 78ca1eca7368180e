use crate::framework::DatabaseProcessor;
use ethers::types::{Address, U256};
use ethers::utils::{hex, to_checksum};
use kanau::processor::Processor;
use relayer_sdk::objects::{RewardGranted, RewardView};
use thiserror::Error;

/// A stored reward. One row per `(latitude, longitude)`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RewardRecord {
    pub id: i64,
    pub token_address: String,
    /// Decimal integer string in the token's smallest unit.
    pub amount: String,
    pub receiver_address: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Transaction hash of the mint, once one has been submitted.
    pub tx_hash: Option<String>,
    pub raw_data: String,
    pub created_at: time::PrimitiveDateTime,
    pub updated_at: time::PrimitiveDateTime,
}

impl RewardRecord {
    pub fn is_settled(&self) -> bool {
        self.tx_hash.is_some()
    }

    pub fn view(&self) -> RewardView {
        RewardView {
            id: self.id,
            token: self.token_address.clone(),
            amount: self.amount.clone(),
            receiver: self.receiver_address.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            tx_hash: self.tx_hash.clone(),
            data: self.raw_data.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("amount must be a decimal integer, got {0:?}")]
    InvalidAmount(String),
    #[error("amount must be positive")]
    ZeroAmount,
    #[error("invalid receiver address {0:?}")]
    InvalidReceiver(String),
    #[error("invalid token address {0:?}")]
    InvalidToken(String),
    #[error("coordinates must be finite")]
    NonFiniteCoordinate,
    #[error("data must not be empty")]
    EmptyData,
}

/// A validated reward ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardUpsert {
    pub token_address: Address,
    pub amount: U256,
    pub receiver_address: Address,
    pub latitude: f64,
    pub longitude: f64,
    pub raw_data: String,
}

impl RewardUpsert {
    /// Validate an inbound event.
    ///
    /// The event may name a token, but the reward is always recorded against
    /// `token`, the one this relayer mints. A token given in the event must
    /// still be a well-formed address.
    pub fn from_event(event: RewardGranted, token: Address) -> Result<Self, ValidationError> {
        if let Some(event_token) = &event.token {
            parse_address(event_token)
                .ok_or_else(|| ValidationError::InvalidToken(event_token.clone()))?;
        }
        let receiver_address = parse_address(&event.receiver)
            .ok_or_else(|| ValidationError::InvalidReceiver(event.receiver.clone()))?;
        let amount = parse_amount(&event.amount)?;
        if !event.latitude.is_finite() || !event.longitude.is_finite() {
            return Err(ValidationError::NonFiniteCoordinate);
        }
        if event.data.is_empty() {
            return Err(ValidationError::EmptyData);
        }

        Ok(Self {
            token_address: token,
            amount,
            receiver_address,
            latitude: event.latitude,
            longitude: event.longitude,
            raw_data: event.data,
        })
    }
}

/// Parse a 20-byte hex address, with or without the `0x` prefix.
pub fn parse_address(value: &str) -> Option<Address> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let bytes = hex::decode(digits).ok()?;
    Some(Address::from_slice(&bytes))
}

fn parse_amount(value: &str) -> Result<U256, ValidationError> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidAmount(value.to_string()));
    }
    let amount =
        U256::from_dec_str(value).map_err(|_| ValidationError::InvalidAmount(value.to_string()))?;
    if amount.is_zero() {
        return Err(ValidationError::ZeroAmount);
    }
    Ok(amount)
}

/// Canonical text form of an address as stored in the database.
pub fn address_to_string(address: &Address) -> String {
    to_checksum(address, None)
}

const REWARD_COLUMNS: &str = "id, token_address, amount, receiver_address, latitude, longitude, \
    tx_hash, raw_data, created_at, updated_at";

#[derive(Debug, Clone)]
/// Insert a reward, or overwrite the receiver, amount and data of the reward
/// already stored at the same coordinates.
///
/// Coordinates are compared exactly. The settlement reference of an existing
/// row is left untouched.
pub struct UpsertRewardByLocation {
    pub reward: RewardUpsert,
}

impl Processor<UpsertRewardByLocation> for DatabaseProcessor {
    type Output = RewardRecord;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertRewardByLocation")]
    async fn process(&self, upsert: UpsertRewardByLocation) -> Result<RewardRecord, sqlx::Error> {
        let reward = upsert.reward;
        let sql = format!(
            r#"
            INSERT INTO rewards (token_address, amount, receiver_address, latitude, longitude, raw_data)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (latitude, longitude) DO UPDATE
            SET receiver_address = EXCLUDED.receiver_address,
                amount = EXCLUDED.amount,
                raw_data = EXCLUDED.raw_data,
                updated_at = NOW()
            RETURNING {REWARD_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, RewardRecord>(&sql)
            .bind(address_to_string(&reward.token_address))
            .bind(reward.amount.to_string())
            .bind(address_to_string(&reward.receiver_address))
            .bind(reward.latitude)
            .bind(reward.longitude)
            .bind(reward.raw_data)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }
}

#[derive(Debug, Clone)]
/// Record the transaction hash of the mint that settled a reward.
///
/// Returns the number of rows updated, zero when the id does not exist.
pub struct SetRewardSettlementRef {
    pub id: i64,
    pub tx_hash: String,
}

impl Processor<SetRewardSettlementRef> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:SetRewardSettlementRef")]
    async fn process(&self, update: SetRewardSettlementRef) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE rewards
            SET tx_hash = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(update.id)
        .bind(update.tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// List rewards that were stored but never settled, oldest first.
pub struct ListPendingSettlements {
    pub limit: i64,
}

impl Processor<ListPendingSettlements> for DatabaseProcessor {
    type Output = Vec<RewardRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListPendingSettlements")]
    async fn process(&self, query: ListPendingSettlements) -> Result<Vec<RewardRecord>, sqlx::Error> {
        let sql = format!(
            "SELECT {REWARD_COLUMNS} FROM rewards WHERE tx_hash IS NULL ORDER BY id LIMIT $1"
        );
        let records = sqlx::query_as::<_, RewardRecord>(&sql)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const RECEIVER: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn event() -> RewardGranted {
        RewardGranted {
            token: None,
            amount: "100".to_string(),
            receiver: RECEIVER.to_string(),
            latitude: 1.0,
            longitude: 2.0,
            data: "x".to_string(),
        }
    }

    fn token() -> Address {
        parse_address(TOKEN).unwrap()
    }

    #[test]
    fn test_valid_event() {
        let upsert = RewardUpsert::from_event(event(), token()).unwrap();
        assert_eq!(upsert.amount, U256::from(100u64));
        assert_eq!(upsert.receiver_address, parse_address(RECEIVER).unwrap());
        assert_eq!(upsert.token_address, token());
        assert_eq!(upsert.raw_data, "x");
    }

    #[test]
    fn test_event_token_is_replaced_by_configured_token() {
        let mut ev = event();
        ev.token = Some("0xcccccccccccccccccccccccccccccccccccccccc".to_string());
        let upsert = RewardUpsert::from_event(ev, token()).unwrap();
        assert_eq!(upsert.token_address, token());
    }

    #[test]
    fn test_malformed_event_token_rejected() {
        let mut ev = event();
        ev.token = Some("0x1234".to_string());
        assert_eq!(
            RewardUpsert::from_event(ev, token()),
            Err(ValidationError::InvalidToken("0x1234".to_string()))
        );
    }

    #[test]
    fn test_amount_validation() {
        for bad in ["", "-5", "1.5", "abc", " 7", "+7"] {
            let mut ev = event();
            ev.amount = bad.to_string();
            assert_eq!(
                RewardUpsert::from_event(ev, token()),
                Err(ValidationError::InvalidAmount(bad.to_string())),
                "amount {bad:?}"
            );
        }

        let mut ev = event();
        ev.amount = "0".to_string();
        assert_eq!(
            RewardUpsert::from_event(ev, token()),
            Err(ValidationError::ZeroAmount)
        );

        let mut ev = event();
        ev.amount = "1".repeat(80);
        assert!(matches!(
            RewardUpsert::from_event(ev, token()),
            Err(ValidationError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_receiver_validation() {
        let mut ev = event();
        ev.receiver = "not-an-address".to_string();
        assert!(matches!(
            RewardUpsert::from_event(ev, token()),
            Err(ValidationError::InvalidReceiver(_))
        ));
    }

    #[test]
    fn test_coordinates_and_data() {
        let mut ev = event();
        ev.latitude = f64::NAN;
        assert_eq!(
            RewardUpsert::from_event(ev, token()),
            Err(ValidationError::NonFiniteCoordinate)
        );

        let mut ev = event();
        ev.data = String::new();
        assert_eq!(
            RewardUpsert::from_event(ev, token()),
            Err(ValidationError::EmptyData)
        );
    }

    #[test]
    fn test_parse_address_forms() {
        let lower = parse_address("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let prefixed = parse_address("0XAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").unwrap();
        assert_eq!(lower, prefixed);
        assert!(parse_address("0xaaaa").is_none());
        assert!(parse_address("0xgggggggggggggggggggggggggggggggggggggggg").is_none());
    }

    #[test]
    fn test_stored_address_form_is_checksummed() {
        let address = parse_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(
            address_to_string(&address),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
    }
}

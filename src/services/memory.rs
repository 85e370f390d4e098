//! In-process position store.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::channels::UserId;
use crate::error::{NotFoundError, Result};
use crate::services::{NewPosition, Position, PositionStore};

/// Positions kept in memory, lost on restart.
#[derive(Default)]
pub struct MemoryPositionStore {
    positions: RwLock<Vec<Position>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.positions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.positions.read().await.is_empty()
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn create(&self, position: NewPosition) -> Result<Position> {
        let record = Position {
            id: Uuid::new_v4(),
            user: position.user,
            symbol: position.symbol,
            buy_price: position.buy_price,
            buy_date: position.buy_date,
            target_price: position.target_price,
            stop_loss: position.stop_loss,
            max_holding_days: position.max_holding_days,
            alert_price: position.alert_price,
            alert_monitor: position.alert_monitor,
            is_active: true,
            exit_price: None,
            exit_date: None,
            created_at: Utc::now(),
        };
        self.positions.write().await.push(record.clone());
        Ok(record)
    }

    async fn update(&self, position: &Position) -> Result<()> {
        let mut positions = self.positions.write().await;
        let slot = positions
            .iter_mut()
            .find(|p| p.id == position.id)
            .ok_or_else(|| NotFoundError::Position {
                user: position.user.0,
                symbol: position.symbol.clone(),
            })?;
        *slot = position.clone();
        Ok(())
    }

    async fn delete(&self, user: UserId, symbol: &str, active: bool) -> Result<bool> {
        let mut positions = self.positions.write().await;
        let before = positions.len();
        positions.retain(|p| !(p.user == user && p.symbol == symbol && p.is_active == active));
        Ok(positions.len() != before)
    }

    async fn list(&self, user: UserId, active: bool) -> Result<Vec<Position>> {
        let positions = self.positions.read().await;
        let mut out: Vec<Position> = positions
            .iter()
            .filter(|p| p.user == user && p.is_active == active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(out)
    }

    async fn find(&self, user: UserId, symbol: &str, active: bool) -> Result<Option<Position>> {
        let positions = self.positions.read().await;
        Ok(positions
            .iter()
            .find(|p| p.user == user && p.symbol == symbol && p.is_active == active)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::error::Error;

    fn new_position(user: i64, symbol: &str) -> NewPosition {
        NewPosition {
            user: UserId(user),
            symbol: symbol.into(),
            buy_price: dec!(100),
            buy_date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            target_price: dec!(120),
            stop_loss: dec!(90),
            max_holding_days: 10,
            alert_price: false,
            alert_monitor: true,
        }
    }

    #[tokio::test]
    async fn create_then_list_by_user_and_activity() {
        let store = MemoryPositionStore::new();
        store.create(new_position(1, "BBCA")).await.unwrap();
        store.create(new_position(1, "ANTM")).await.unwrap();
        store.create(new_position(2, "TLKM")).await.unwrap();

        let mine = store.list(UserId(1), true).await.unwrap();
        let symbols: Vec<_> = mine.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["ANTM", "BBCA"]);
        assert!(store.list(UserId(1), false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_moves_position_to_inactive() {
        let store = MemoryPositionStore::new();
        let mut position = store.create(new_position(1, "BBRI")).await.unwrap();
        position.is_active = false;
        position.exit_price = Some(dec!(110));
        store.update(&position).await.unwrap();

        assert!(store.find(UserId(1), "BBRI", true).await.unwrap().is_none());
        let closed = store.find(UserId(1), "BBRI", false).await.unwrap().unwrap();
        assert_eq!(closed.exit_price, Some(dec!(110)));
    }

    #[tokio::test]
    async fn update_unknown_is_not_found() {
        let store = MemoryPositionStore::new();
        let mut position = store.create(new_position(1, "BBRI")).await.unwrap();
        position.id = Uuid::new_v4();
        let err = store.update(&position).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(NotFoundError::Position { .. })));
    }

    #[tokio::test]
    async fn delete_matches_activity_flag() {
        let store = MemoryPositionStore::new();
        store.create(new_position(1, "ASII")).await.unwrap();
        assert!(!store.delete(UserId(1), "ASII", false).await.unwrap());
        assert!(store.delete(UserId(1), "ASII", true).await.unwrap());
        assert!(store.is_empty().await);
    }
}

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::config::AppConfig;
use crate::errors::Result;
use crate::models::transaction::{Transaction, TransactionFilter, TransactionStatus};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_transactions: usize,
    /// Sum of completed amounts.
    pub total_volume: f64,
    /// Percentage of completed transactions, one decimal place.
    pub success_rate: f64,
    pub pending_count: usize,
    pub today_transactions: usize,
    pub today_volume: f64,
}

fn completed_volume<'a>(transactions: impl Iterator<Item = &'a Transaction>) -> f64 {
    transactions
        .filter(|t| t.status == TransactionStatus::Completed)
        .map(|t| t.amount)
        .sum()
}

pub fn compute_stats(transactions: &[Transaction], now: DateTime<Utc>, offset: &FixedOffset) -> DashboardStats {
    let total = transactions.len();
    let completed = transactions
        .iter()
        .filter(|t| t.status == TransactionStatus::Completed)
        .count();
    let success_rate = if total == 0 {
        0.0
    } else {
        (completed as f64 / total as f64 * 1000.0).round() / 10.0
    };

    let today = now.with_timezone(offset).date_naive();
    let is_today = |t: &&Transaction| t.created_at.with_timezone(offset).date_naive() == today;

    DashboardStats {
        total_transactions: total,
        total_volume: completed_volume(transactions.iter()),
        success_rate,
        pending_count: transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Pending)
            .count(),
        today_transactions: transactions.iter().filter(is_today).count(),
        today_volume: completed_volume(transactions.iter().filter(is_today)),
    }
}

pub async fn dashboard_stats(store: &dyn Store, config: &AppConfig) -> Result<DashboardStats> {
    let transactions = store.list_transactions(&TransactionFilter::default()).await?;
    Ok(compute_stats(&transactions, Utc::now(), &config.local_offset()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transaction::{NewTransaction, TransactionType};
    use chrono::Duration;

    fn tx(amount: f64, status: TransactionStatus, created_at: DateTime<Utc>) -> Transaction {
        let mut tx = Transaction::pending(
            NewTransaction {
                transaction_id: format!("STK{}", amount),
                transaction_type: TransactionType::Collection,
                amount,
                phone_number: "254712345678".to_string(),
                account_reference: "INV".to_string(),
                description: None,
                conversation_id: format!("CR{}", amount),
                originator_conversation_id: None,
                customer_id: None,
                customer_name: None,
            },
            created_at,
        );
        tx.status = status;
        tx
    }

    #[test]
    fn stats_split_today_from_history() {
        let now = Utc::now();
        let utc = FixedOffset::east_opt(0).unwrap();
        let transactions = vec![
            tx(100.0, TransactionStatus::Completed, now),
            tx(200.0, TransactionStatus::Pending, now),
            tx(300.0, TransactionStatus::Completed, now - Duration::days(3)),
        ];

        let stats = compute_stats(&transactions, now, &utc);
        assert_eq!(stats.total_transactions, 3);
        assert_eq!(stats.total_volume, 400.0);
        assert_eq!(stats.success_rate, 66.7);
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.today_transactions, 2);
        assert_eq!(stats.today_volume, 100.0);
    }

    #[test]
    fn no_transactions_means_zero_rate() {
        let stats = compute_stats(&[], Utc::now(), &FixedOffset::east_opt(0).unwrap());
        assert_eq!(stats.success_rate, 0.0);
    }
}

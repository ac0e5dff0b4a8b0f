use crate::config::AssignmentPolicyKind;
use crate::entities::delivery_partner::PartnerCandidate;
use crate::utils::geo::GeoPoint;
use std::cmp::Ordering;
use std::fmt::Debug;
use std::sync::Arc;

/// Decides in which order eligible partners are offered a delivery.
///
/// Candidates arrive least loaded first, ties broken by who joined earliest. A policy
/// reorders them; the first one that can still be bound gets the delivery.
pub trait AssignmentPolicy: Debug + Send + Sync {
    fn rank(&self, candidates: &mut [PartnerCandidate], pickup: Option<GeoPoint>);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoaded;

impl AssignmentPolicy for LeastLoaded {
    fn rank(&self, candidates: &mut [PartnerCandidate], _pickup: Option<GeoPoint>) {
        candidates.sort_by_key(|c| (c.active_deliveries, c.partner.created_at, c.partner.id));
    }
}

/// Closest partner to the pickup point first. Partners without a known location go
/// last; equal distances keep the least-loaded order.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestFirst;

impl AssignmentPolicy for NearestFirst {
    fn rank(&self, candidates: &mut [PartnerCandidate], pickup: Option<GeoPoint>) {
        LeastLoaded.rank(candidates, pickup);
        let Some(pickup) = pickup else {
            return;
        };
        let distance = |c: &PartnerCandidate| {
            GeoPoint::from_parts(c.partner.current_latitude, c.partner.current_longitude)
                .map(|at| at.distance_meters(&pickup))
        };
        candidates.sort_by(|a, b| match (distance(a), distance(b)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
    }
}

pub fn policy_for(kind: AssignmentPolicyKind) -> Arc<dyn AssignmentPolicy> {
    match kind {
        AssignmentPolicyKind::LeastLoaded => Arc::new(LeastLoaded),
        AssignmentPolicyKind::Nearest => Arc::new(NearestFirst),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::delivery_partner::{DeliveryPartner, PartnerStatus, VehicleType};
    use rust_decimal::Decimal;
    use time::macros::datetime;

    fn candidate(id: i32, active: i64, joined_minute: u8, at: Option<(f64, f64)>) -> PartnerCandidate {
        PartnerCandidate {
            partner: DeliveryPartner {
                id,
                user_id: id * 10,
                vehicle_type: VehicleType::Scooter,
                vehicle_number: "KA01".into(),
                status: PartnerStatus::Approved,
                reviewed_by: None,
                reviewed_at: None,
                rejection_reason: None,
                is_available: true,
                current_latitude: at.map(|p| p.0),
                current_longitude: at.map(|p| p.1),
                total_deliveries: 0,
                rating: Decimal::ZERO,
                total_earnings: Decimal::ZERO,
                created_at: datetime!(2024-01-01 10:00) + time::Duration::minutes(joined_minute.into()),
            },
            active_deliveries: active,
        }
    }

    fn ids(candidates: &[PartnerCandidate]) -> Vec<i32> {
        candidates.iter().map(|c| c.partner.id).collect()
    }

    #[test]
    fn least_loaded_then_oldest() {
        let mut candidates = vec![
            candidate(1, 1, 0, None),
            candidate(2, 0, 30, None),
            candidate(3, 0, 10, None),
        ];
        LeastLoaded.rank(&mut candidates, None);
        assert_eq!(ids(&candidates), vec![3, 2, 1]);
    }

    #[test]
    fn nearest_first_puts_unknown_locations_last() {
        let pickup = GeoPoint::new(12.9716, 77.5946);
        let mut candidates = vec![
            candidate(1, 0, 0, None),
            candidate(2, 0, 10, Some((13.05, 77.6))),
            candidate(3, 0, 20, Some((12.972, 77.595))),
        ];
        NearestFirst.rank(&mut candidates, Some(pickup));
        assert_eq!(ids(&candidates), vec![3, 2, 1]);
    }

    #[test]
    fn nearest_without_pickup_falls_back_to_load() {
        let mut candidates = vec![candidate(1, 0, 20, Some((1.0, 1.0))), candidate(2, 0, 10, None)];
        NearestFirst.rank(&mut candidates, None);
        assert_eq!(ids(&candidates), vec![2, 1]);
    }
}

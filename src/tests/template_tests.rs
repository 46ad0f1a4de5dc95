//! tests/template_tests.rs
//! Salida exacta del mensaje para las formas de ruta más comunes.

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::models::channel_model::Channel;
    use crate::models::dispatch_model::{DispatchRecord, DispatchStatus};
    use crate::models::entity_model::Route;
    use crate::services::template_service::{TemplateEngine, VehicleView};
    use crate::tests::support::{booking, driver, route, vehicle, ROUTE_ID};

    fn dispatch_record() -> DispatchRecord {
        let created = Utc.with_ymd_and_hms(2025, 3, 14, 7, 30, 0).unwrap();
        DispatchRecord {
            id: "d-1".to_string(),
            route_id: ROUTE_ID.to_string(),
            driver_id: "drv".to_string(),
            status: DispatchStatus::Pending,
            requested_channels: vec![Channel::Email],
            metadata: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn bare_route() -> Route {
        Route {
            id: ROUTE_ID.to_string(),
            name: "Night Run".to_string(),
            code: None,
            date: "2025-03-15".to_string(),
            planned_start_time: None,
            planned_end_time: Some("  ".to_string()),
            total_stops: 0,
            total_distance_km: None,
            total_duration_minutes: None,
            vehicle_id: None,
            driver_id: None,
        }
    }

    #[test]
    fn renders_full_route() {
        let engine = TemplateEngine::new("https://app.example.com/");
        let d = driver("drv", Some("ana@example.com"), None, None, false);
        let r = route(ROUTE_ID, Some("v"));
        let v = vehicle("v");

        let mut second = booking(ROUTE_ID, 2, "Blue Spa");
        second.address = "99 Oak Ave".to_string();
        second.special_instructions = Some("Gate code 4411".to_string());
        let mut first = booking(ROUTE_ID, 1, "Acme Pools");
        first.address = "12 Main St".to_string();
        first.scheduled_time = Some("08:30".to_string());
        first.services = Some("Pool cleaning".to_string());
        first.maps_url =
            Some("https://www.google.com/maps/dir/?api=1&destination=40.1,-75.2".to_string());

        let context = engine.build_context(&dispatch_record(), &d, &r, Some(&v), &[second, first]);
        let text = engine.render(&context);

        let expected = "\
Route Assignment: Downtown Loop (DT-01)
Date: 2025-03-14
Planned: 08:00 - 16:30
Driver: Ana Lopez
Vehicle: Van 3 (ABC-123) - Ford Transit
Stops: 2 | Distance: 12.3 km | Duration: 95 min

Stops:
1. Acme Pools
   Address: 12 Main St
   Time: 08:30
   Services: Pool cleaning
   Map: https://www.google.com/maps/dir/?api=1&destination=40.1,-75.2
2. Blue Spa
   Address: 99 Oak Ave
   Notes: Gate code 4411

Route map: https://app.example.com/routes.html?routeId=6f1a2b3c-4d5e-4f60-8a7b-9c0d1e2f3a4b
Dispatched at: 2025-03-14T07:30:00Z";

        assert_eq!(text, expected);
    }

    #[test]
    fn renders_route_without_vehicle_or_stops() {
        let engine = TemplateEngine::new("https://app.example.com");
        let d = driver("drv", None, Some("42"), None, false);

        let context = engine.build_context(&dispatch_record(), &d, &bare_route(), None, &[]);
        assert_eq!(context.vehicle, VehicleView::Unassigned);
        assert!(context.route.planned_end_time.is_none());

        let expected = "\
Route Assignment: Night Run
Date: 2025-03-15
Driver: Ana Lopez
Vehicle: not assigned
Stops: 0

Route map: https://app.example.com/routes.html?routeId=6f1a2b3c-4d5e-4f60-8a7b-9c0d1e2f3a4b
Dispatched at: 2025-03-14T07:30:00Z";

        assert_eq!(engine.render(&context), expected);
    }

    #[test]
    fn rendering_is_deterministic() {
        let engine = TemplateEngine::new("https://app.example.com");
        let d = driver("drv", None, Some("42"), None, false);
        let r = route(ROUTE_ID, None);
        let bookings = vec![booking(ROUTE_ID, 1, "A"), booking(ROUTE_ID, 2, "B")];

        let first = engine.render(&engine.build_context(&dispatch_record(), &d, &r, None, &bookings));
        let second = engine.render(&engine.build_context(&dispatch_record(), &d, &r, None, &bookings));
        assert_eq!(first, second);
    }

    #[test]
    fn route_id_is_url_encoded_in_map_link() {
        let engine = TemplateEngine::new("https://app.example.com");
        let d = driver("drv", None, Some("42"), None, false);
        let mut r = bare_route();
        r.id = "route a&b".to_string();

        let context = engine.build_context(&dispatch_record(), &d, &r, None, &[]);
        assert_eq!(
            context.route_map_url,
            "https://app.example.com/routes.html?routeId=route%20a%26b"
        );
    }

    #[test]
    fn text_is_not_escaped_for_any_channel() {
        let engine = TemplateEngine::new("https://app.example.com");
        let d = driver("drv", None, Some("42"), None, false);
        let mut r = bare_route();
        r.name = "North_Side *Express* <b>".to_string();

        let text = engine.render(&engine.build_context(&dispatch_record(), &d, &r, None, &[]));
        assert!(text.starts_with("Route Assignment: North_Side *Express* <b>\n"));
    }
}

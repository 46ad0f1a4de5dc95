//! services/template_service.rs
//! Construye el contexto del mensaje y lo renderiza como texto plano, igual para todos los canales.

use chrono::SecondsFormat;

use crate::models::dispatch_model::DispatchRecord;
use crate::models::entity_model::{Booking, Driver, Route, Vehicle};

#[derive(Debug, Clone, PartialEq)]
pub struct RouteView {
    pub name: String,
    pub code: Option<String>,
    pub date: String,
    pub planned_start_time: Option<String>,
    pub planned_end_time: Option<String>,
    pub total_stops: i64,
    pub total_distance_km: Option<f64>,
    pub total_duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverView {
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VehicleView {
    Assigned {
        name: String,
        license_plate: Option<String>,
        make: Option<String>,
        model: Option<String>,
    },
    Unassigned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopView {
    pub stop_number: i64,
    pub client_name: String,
    pub address: String,
    pub scheduled_time: Option<String>,
    pub services: Option<String>,
    pub special_instructions: Option<String>,
    pub maps_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderContext {
    pub route: RouteView,
    pub driver: DriverView,
    pub vehicle: VehicleView,
    pub stops: Vec<StopView>,
    pub route_map_url: String,
    pub dispatched_at: String,
}

#[derive(Debug, Clone)]
pub struct TemplateEngine {
    app_base_url: String,
}

impl TemplateEngine {
    pub fn new(app_base_url: impl Into<String>) -> Self {
        let app_base_url = app_base_url.into();
        TemplateEngine {
            app_base_url: app_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn build_context(
        &self,
        dispatch: &DispatchRecord,
        driver: &Driver,
        route: &Route,
        vehicle: Option<&Vehicle>,
        bookings: &[Booking],
    ) -> RenderContext {
        let mut stops: Vec<StopView> = bookings
            .iter()
            .map(|b| StopView {
                stop_number: b.stop_number,
                client_name: b.client_name.clone(),
                address: b.address.clone(),
                scheduled_time: present(&b.scheduled_time),
                services: present(&b.services),
                special_instructions: present(&b.special_instructions),
                maps_url: present(&b.maps_url),
            })
            .collect();
        // sort_by_key es estable: empates conservan el orden del repositorio
        stops.sort_by_key(|s| s.stop_number);

        let vehicle = match vehicle {
            Some(v) => VehicleView::Assigned {
                name: v.name.clone(),
                license_plate: present(&v.license_plate),
                make: present(&v.make),
                model: present(&v.model),
            },
            None => VehicleView::Unassigned,
        };

        RenderContext {
            route: RouteView {
                name: route.name.clone(),
                code: present(&route.code),
                date: route.date.clone(),
                planned_start_time: present(&route.planned_start_time),
                planned_end_time: present(&route.planned_end_time),
                total_stops: route.total_stops,
                total_distance_km: route.total_distance_km,
                total_duration_minutes: route.total_duration_minutes,
            },
            driver: DriverView {
                first_name: driver.first_name.clone(),
                last_name: driver.last_name.clone(),
                full_name: driver.full_name(),
            },
            vehicle,
            stops,
            route_map_url: format!(
                "{}/routes.html?routeId={}",
                self.app_base_url,
                urlencoding::encode(&route.id)
            ),
            dispatched_at: dispatch
                .created_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Plain text, no markup. Channels escape it for their own format.
    pub fn render(&self, context: &RenderContext) -> String {
        let route = &context.route;
        let mut lines: Vec<String> = Vec::new();

        match &route.code {
            Some(code) => lines.push(format!("Route Assignment: {} ({})", route.name, code)),
            None => lines.push(format!("Route Assignment: {}", route.name)),
        }
        lines.push(format!("Date: {}", route.date));
        match (&route.planned_start_time, &route.planned_end_time) {
            (Some(start), Some(end)) => lines.push(format!("Planned: {start} - {end}")),
            (Some(start), None) => lines.push(format!("Planned start: {start}")),
            (None, Some(end)) => lines.push(format!("Planned end: {end}")),
            (None, None) => {}
        }
        lines.push(format!("Driver: {}", context.driver.full_name));
        lines.push(vehicle_line(&context.vehicle));

        let mut summary = vec![format!("Stops: {}", route.total_stops)];
        if let Some(km) = route.total_distance_km {
            summary.push(format!("Distance: {km:.1} km"));
        }
        if let Some(minutes) = route.total_duration_minutes {
            summary.push(format!("Duration: {minutes} min"));
        }
        lines.push(summary.join(" | "));

        if !context.stops.is_empty() {
            lines.push(String::new());
            lines.push("Stops:".to_string());
            for stop in &context.stops {
                lines.push(format!("{}. {}", stop.stop_number, stop.client_name));
                lines.push(format!("   Address: {}", stop.address));
                let details = [
                    ("Time", &stop.scheduled_time),
                    ("Services", &stop.services),
                    ("Notes", &stop.special_instructions),
                    ("Map", &stop.maps_url),
                ];
                for (label, value) in details {
                    if let Some(value) = value {
                        lines.push(format!("   {label}: {value}"));
                    }
                }
            }
        }

        lines.push(String::new());
        lines.push(format!("Route map: {}", context.route_map_url));
        lines.push(format!("Dispatched at: {}", context.dispatched_at));

        lines.join("\n")
    }
}

fn vehicle_line(vehicle: &VehicleView) -> String {
    match vehicle {
        VehicleView::Unassigned => "Vehicle: not assigned".to_string(),
        VehicleView::Assigned {
            name,
            license_plate,
            make,
            model,
        } => {
            let mut line = format!("Vehicle: {name}");
            if let Some(plate) = license_plate {
                line.push_str(&format!(" ({plate})"));
            }
            let make_model: Vec<&str> = [make, model]
                .into_iter()
                .filter_map(|v| v.as_deref())
                .collect();
            if !make_model.is_empty() {
                line.push_str(&format!(" - {}", make_model.join(" ")));
            }
            line
        }
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

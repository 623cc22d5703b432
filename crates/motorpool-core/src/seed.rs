//! Demo fleet loaded by `--seed-demo`.

use crate::types::VehicleDraft;

const DEMO_FLEET: &[(&str, &str, i32)] = &[
    ("Dodge", "Charger R/T", 1970),
    ("Nissan", "Skyline GT-R", 2002),
    ("Nissan", "240SX", 1997),
    ("Aston Martin", "DB9", 2008),
    ("Acura", "NSX", 2002),
];

pub fn demo_vehicles() -> Vec<VehicleDraft> {
    DEMO_FLEET
        .iter()
        .map(|(make, model, year)| VehicleDraft::new(*make, *model, *year))
        .collect()
}

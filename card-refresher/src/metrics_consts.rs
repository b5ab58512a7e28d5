pub const RUN_STARTS: &str = "card_refresher_run_starts";
pub const RUN_TIME: &str = "card_refresher_total_run_ms";
pub const RUN_FAILURES: &str = "card_refresher_run_failures";

pub const TENANTS_REFRESHED: &str = "card_refresher_tenants";
pub const TENANT_FAILURES: &str = "card_refresher_tenant_failures";

pub const UNITS_DERIVED: &str = "card_refresher_units_derived";
pub const UNIT_FAILURES: &str = "card_refresher_unit_failures";
pub const DERIVE_TIME: &str = "card_refresher_derive_ms";

pub const VIEWS_PUBLISHED: &str = "card_refresher_views_published";
pub const VIEW_FAILURES: &str = "card_refresher_view_failures";
pub const VIEWS_TIME: &str = "card_refresher_views_ms";

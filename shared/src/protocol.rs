/// Snapshot endpoint, relative to the gateway base URL
pub const SUMMARY_PATH: &str = "/auth/docker/summary";

/// Push channel endpoint; the bearer token travels as the `token` query parameter
pub const EVENTS_PATH: &str = "/auth/docker/events";
pub const EVENTS_TOKEN_PARAM: &str = "token";

/// Lifecycle command endpoint prefix: `{prefix}/{action}/{service_id}`
pub const COMMAND_PREFIX: &str = "/auth/docker";

/// SSE event name carrying container lifecycle payloads
pub const LIFECYCLE_EVENT_NAME: &str = "docker-event";

/// Services whose availability defines "system healthy"
pub const CRITICAL_SERVICES: [&str; 2] = ["api-gateway", "auth-service"];

/// Service gating the product listing
pub const PRODUCT_SERVICE: &str = "product-service";

/// Lifecycle actions that mean the container went away
pub const OFFLINE_ACTIONS: [&str; 3] = ["die", "stop", "kill"];

/// Lifecycle actions that mean the container is running again
pub const ONLINE_ACTIONS: [&str; 3] = ["start", "restart", "unpause"];

/// Local API path prefix
pub const API_PREFIX: &str = "/v1";

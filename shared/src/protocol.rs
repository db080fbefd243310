/// API path prefix
pub const API_PREFIX: &str = "/v4";

/// Header carrying the caller's tenant domain; the project is a path segment
pub const DOMAIN_HEADER: &str = "x-domain-name";

pub const DEFAULT_DOMAIN: &str = "default";
pub const DEFAULT_PROJECT: &str = "default";

/// App id assigned to registrations that omit one
pub const DEFAULT_APP_ID: &str = "default";

/// Environments a service may be registered under. The empty string is the
/// implicit development environment.
pub const ENV_DEV: &str = "development";
pub const ENV_TEST: &str = "testing";
pub const ENV_ACCEPT: &str = "acceptance";
pub const ENV_PROD: &str = "production";

pub const ENVIRONMENTS: &[&str] = &["", ENV_DEV, ENV_TEST, ENV_ACCEPT, ENV_PROD];

/// Version rule selecting the highest registered version
pub const VERSION_RULE_LATEST: &str = "latest";

/// Existence query selectors
pub const EXIST_TYPE_MICROSERVICE: &str = "microservice";
pub const EXIST_TYPE_SCHEMA: &str = "schema";

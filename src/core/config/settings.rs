use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment, parse_f64,
    parse_u16, parse_u32, parse_u64, parse_usize,
};
use super::secret::load_or_create_secret_key;
use super::types::{
    ApiSettings, ConfigError, CorsSettings, DatabaseSettings, GradingSettings, PlacementSettings,
    RuntimeSettings, SandboxSettings, SecuritySettings, ServerHost, ServerPort, ServerSettings,
    Settings, TelemetrySettings,
};
use crate::services::aggregation::MAX_COMPOSITE_MARK;
use crate::services::placement::MAX_PLACEMENT_QUESTIONS;

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("EDU_HOST", "0.0.0.0");
        let port = env_or_default("EDU_PORT", "8000");

        let environment =
            parse_environment(env_optional("EDU_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("EDU_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Eduvers Assessment API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let secret_key = match env_optional("SECRET_KEY") {
            Some(value) => value,
            None => load_or_create_secret_key(),
        };
        let access_token_expire_minutes = parse_u64(
            "ACCESS_TOKEN_EXPIRE_MINUTES",
            env_or_default("ACCESS_TOKEN_EXPIRE_MINUTES", "10080"),
        )?;
        let algorithm = env_or_default("ALGORITHM", "HS256");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "eduvers");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "eduvers");
        let database_url = env_optional("DATABASE_URL");

        let sandbox = SandboxSettings {
            base_url: env_or_default("SANDBOX_BASE_URL", "http://localhost:2358")
                .trim_end_matches('/')
                .to_string(),
            api_key: env_or_default("SANDBOX_API_KEY", ""),
            language_id: parse_u32(
                "SANDBOX_LANGUAGE_ID",
                env_or_default("SANDBOX_LANGUAGE_ID", "54"),
            )?,
            request_timeout_ms: parse_u64(
                "SANDBOX_REQUEST_TIMEOUT_MS",
                env_or_default("SANDBOX_REQUEST_TIMEOUT_MS", "3000"),
            )?,
            initial_wait_ms: parse_u64(
                "SANDBOX_INITIAL_WAIT_MS",
                env_or_default("SANDBOX_INITIAL_WAIT_MS", "1000"),
            )?,
            poll_interval_ms: parse_u64(
                "SANDBOX_POLL_INTERVAL_MS",
                env_or_default("SANDBOX_POLL_INTERVAL_MS", "1000"),
            )?,
            max_polls: parse_u32("SANDBOX_MAX_POLLS", env_or_default("SANDBOX_MAX_POLLS", "2"))?,
            budget_ms: parse_u64("SANDBOX_BUDGET_MS", env_or_default("SANDBOX_BUDGET_MS", "5000"))?,
            max_concurrent_runs: parse_usize(
                "SANDBOX_MAX_CONCURRENCY",
                env_or_default("SANDBOX_MAX_CONCURRENCY", "4"),
            )?,
        };

        let grading = GradingSettings {
            mcq_weight: parse_f64("GRADING_MCQ_WEIGHT", env_or_default("GRADING_MCQ_WEIGHT", "3"))?,
            tf_weight: parse_f64("GRADING_TF_WEIGHT", env_or_default("GRADING_TF_WEIGHT", "2"))?,
            code_weight: parse_f64(
                "GRADING_CODE_WEIGHT",
                env_or_default("GRADING_CODE_WEIGHT", "5"),
            )?,
            grade_a_min: parse_f64("GRADE_A_MIN", env_or_default("GRADE_A_MIN", "9"))?,
            grade_b_min: parse_f64("GRADE_B_MIN", env_or_default("GRADE_B_MIN", "7"))?,
            grade_c_min: parse_f64("GRADE_C_MIN", env_or_default("GRADE_C_MIN", "5"))?,
        };

        let placement = PlacementSettings {
            question_count: parse_usize(
                "PLACEMENT_QUESTION_COUNT",
                env_or_default("PLACEMENT_QUESTION_COUNT", "5"),
            )?,
            pass_ratio: parse_f64(
                "PLACEMENT_PASS_RATIO",
                env_or_default("PLACEMENT_PASS_RATIO", "0.7"),
            )?,
            assume_correct_on_unknown_question: env_optional(
                "PLACEMENT_ASSUME_CORRECT_ON_UNKNOWN",
            )
            .map(|value| parse_bool(&value))
            .unwrap_or(true),
        };

        let log_level = env_or_default("EDU_LOG_LEVEL", "info");
        let json = env_optional("EDU_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            security: SecuritySettings { secret_key, access_token_expire_minutes, algorithm },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            sandbox,
            grading,
            placement,
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn sandbox(&self) -> &SandboxSettings {
        &self.sandbox
    }

    pub(crate) fn grading(&self) -> &GradingSettings {
        &self.grading
    }

    pub(crate) fn placement(&self) -> &PlacementSettings {
        &self.placement
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let weights = [
            ("GRADING_MCQ_WEIGHT", self.grading.mcq_weight),
            ("GRADING_TF_WEIGHT", self.grading.tf_weight),
            ("GRADING_CODE_WEIGHT", self.grading.code_weight),
        ];
        for (field, weight) in weights {
            if weight < 0.0 {
                return Err(ConfigError::InvalidValue { field, value: weight.to_string() });
            }
        }
        let weight_sum: f64 = weights.iter().map(|(_, weight)| weight).sum();
        if weight_sum > MAX_COMPOSITE_MARK {
            return Err(ConfigError::InvalidValue {
                field: "GRADING_*_WEIGHT",
                value: weight_sum.to_string(),
            });
        }

        let bands = &self.grading;
        if !(bands.grade_a_min <= MAX_COMPOSITE_MARK
            && bands.grade_a_min > bands.grade_b_min
            && bands.grade_b_min > bands.grade_c_min
            && bands.grade_c_min >= 0.0)
        {
            return Err(ConfigError::InvalidValue {
                field: "GRADE_*_MIN",
                value: format!("{}/{}/{}", bands.grade_a_min, bands.grade_b_min, bands.grade_c_min),
            });
        }

        if self.sandbox.max_polls == 0 {
            return Err(ConfigError::InvalidValue {
                field: "SANDBOX_MAX_POLLS",
                value: "0".to_string(),
            });
        }

        if self.sandbox.budget_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "SANDBOX_BUDGET_MS",
                value: "0".to_string(),
            });
        }

        if self.sandbox.max_concurrent_runs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "SANDBOX_MAX_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        if !(1..=MAX_PLACEMENT_QUESTIONS).contains(&self.placement.question_count) {
            return Err(ConfigError::InvalidValue {
                field: "PLACEMENT_QUESTION_COUNT",
                value: self.placement.question_count.to_string(),
            });
        }

        if !(self.placement.pass_ratio > 0.0 && self.placement.pass_ratio <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "PLACEMENT_PASS_RATIO",
                value: self.placement.pass_ratio.to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.sandbox.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("SANDBOX_API_KEY"));
        }

        Ok(())
    }
}

//! Which requests are not worth a log record.

/// User-agent prefix sent by AWS load balancer health checks.
pub const ELB_HEALTH_CHECKER: &str = "ELB-HealthChecker";

/// Cheap pre-filter run before any timing or record work.
#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    pub static_prefixes: Vec<String>,
    pub health_check_agents: Vec<String>,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self::with_static_prefixes(vec![
            "/css".to_string(),
            "/javascripts".to_string(),
            "/img".to_string(),
        ])
    }
}

impl ExclusionPolicy {
    pub fn with_static_prefixes(static_prefixes: Vec<String>) -> Self {
        Self {
            static_prefixes,
            health_check_agents: vec![ELB_HEALTH_CHECKER.to_string()],
        }
    }

    /// True if the request should not be logged.
    pub fn skips(&self, url: &str, user_agent: Option<&str>) -> bool {
        if self.static_prefixes.iter().any(|p| url.starts_with(p.as_str())) {
            return true;
        }

        match user_agent {
            Some(ua) => self
                .health_check_agents
                .iter()
                .any(|agent| ua.starts_with(agent.as_str())),
            None => false,
        }
    }
}

pub mod sys {
    use std::env;

    const KUBERNETES_HOSTNAME_ENV: &str = "GATEWAY_POD_NAME";

    /// Node name used as the common metric label. Inside kubernetes the pod
    /// name is injected via `GATEWAY_POD_NAME`; elsewhere fall back to the
    /// shell's `HOSTNAME`.
    pub fn hostname() -> String {
        env::var(KUBERNETES_HOSTNAME_ENV)
            .or_else(|_| env::var("HOSTNAME"))
            .unwrap_or_else(|_| "localhost".to_string())
    }
}

#[cfg(test)]
mod tests {
    #[test]
    pub fn test_hostname_not_empty() {
        assert!(!super::sys::hostname().is_empty());
    }
}

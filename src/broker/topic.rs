use regex::Regex;

/// Extracts the topic from a request path of the form `/<service>/<topic>`.
///
/// Topics are one or more lowercase ASCII letters. Anything else, including
/// trailing slashes and nested segments, resolves to no topic.
#[derive(Debug, Clone)]
pub struct TopicResolver {
    service_name: String,
    pattern: Regex,
}

impl TopicResolver {
    pub fn new(service_name: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!("^/{}/([a-z]+)$", regex::escape(service_name)))?;
        Ok(Self {
            service_name: service_name.to_string(),
            pattern,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn resolve(&self, path: &str) -> Option<String> {
        self.pattern
            .captures(path)
            .and_then(|caps| caps.get(1))
            .map(|topic| topic.as_str().to_string())
    }
}

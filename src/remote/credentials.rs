/// Source of the credentials attached to every remote request.
pub trait CredentialsProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;
    fn installation_id(&self) -> Option<String>;
}

/// Credentials fixed at startup, typically from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialsProvider {
    access_token: Option<String>,
    installation_id: Option<String>,
}

impl StaticCredentialsProvider {
    pub fn new(access_token: Option<String>, installation_id: Option<String>) -> Self {
        Self {
            access_token,
            installation_id,
        }
    }
}

impl CredentialsProvider for StaticCredentialsProvider {
    fn access_token(&self) -> Option<String> {
        self.access_token.clone()
    }

    fn installation_id(&self) -> Option<String> {
        self.installation_id.clone()
    }
}

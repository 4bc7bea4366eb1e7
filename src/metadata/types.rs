use serde::Deserialize;

/// A service as listed by `GET /services`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub stack_name: String,
    /// Desired number of instances
    #[serde(default, deserialize_with = "null_as_default")]
    pub scale: u32,
    /// Free-form service metadata, only `sensu.monitored` is looked at.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub containers: Vec<ContainerRef>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Older metadata versions list container names, newer ones embed
/// the container objects.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ContainerRef {
    Name(String),
    Object { name: String },
}

impl ContainerRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Name(name) | Self::Object { name } => name,
        }
    }
}

impl ServiceRecord {
    /// Sensu source the events of this service are attached to.
    pub fn source(&self) -> String {
        format!("{}_{}.rancher.internal", self.stack_name, self.name)
    }

    /// Only an explicit `false` turns monitoring off; any other value,
    /// or no value at all, leaves the service monitored.
    pub fn monitored(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.pointer("/sensu/monitored"))
            .and_then(serde_json::Value::as_bool)
            != Some(false)
    }

    pub fn container_ids(&self) -> impl Iterator<Item = &str> {
        self.containers.iter().map(ContainerRef::id)
    }
}

/// A container as returned by `GET /containers/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ContainerRecord {
    pub health_state: Option<String>,
    pub start_count: Option<u64>,
}

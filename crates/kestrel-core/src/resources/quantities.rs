use crate::{KestrelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Resource quantities for nodes and pods
///
/// Used both as a pod's request vector and as a node's allocatable or
/// remaining capacity. Extended resources (e.g. `example.com/gpu`) are
/// plain integer counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuantities {
    /// CPU in millicores (1000 = 1 core)
    #[serde(default)]
    pub cpu_millicores: i64,
    /// Memory in bytes
    #[serde(default)]
    pub memory_bytes: i64,
    /// Extended resources by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extended: BTreeMap<String, i64>,
}

impl ResourceQuantities {
    /// Create a vector holding only CPU and memory
    pub fn new(cpu_millicores: i64, memory_bytes: i64) -> Self {
        Self {
            cpu_millicores,
            memory_bytes,
            extended: BTreeMap::new(),
        }
    }

    /// Add an extended resource
    pub fn with_extended(mut self, name: impl Into<String>, amount: i64) -> Self {
        self.extended.insert(name.into(), amount);
        self
    }

    /// Parse CPU string (e.g., "2", "1000m", "0.5"). Negative and
    /// non-finite values are rejected.
    pub fn parse_cpu(s: &str) -> std::result::Result<i64, String> {
        let millis = if let Some(m) = s.strip_suffix('m') {
            // Millicores
            m.parse::<i64>()
                .map_err(|e| format!("Invalid CPU millicore value: {}", e))?
        } else if let Ok(cores) = s.parse::<f64>() {
            // Cores as float
            if !cores.is_finite() {
                return Err(format!("CPU value is not finite: {}", s));
            }
            (cores * 1000.0) as i64
        } else {
            return Err(format!("Invalid CPU format: {}", s));
        };
        if millis < 0 {
            return Err(format!("CPU value is negative: {}", s));
        }
        Ok(millis)
    }

    /// Parse memory string (e.g., "128Mi", "1Gi", "1024"). Negative values
    /// are rejected.
    pub fn parse_memory(s: &str) -> std::result::Result<i64, String> {
        let scaled = |num: &str, factor: i64| -> std::result::Result<i64, String> {
            num.parse::<i64>()
                .map_err(|e| e.to_string())?
                .checked_mul(factor)
                .ok_or_else(|| format!("Memory value overflows: {}", s))
        };

        let bytes = if let Some(num) = s.strip_suffix("Ki") {
            scaled(num, 1024)
        } else if let Some(num) = s.strip_suffix("Mi") {
            scaled(num, 1024 * 1024)
        } else if let Some(num) = s.strip_suffix("Gi") {
            scaled(num, 1024 * 1024 * 1024)
        } else if let Some(num) = s.strip_suffix("Ti") {
            scaled(num, 1024 * 1024 * 1024 * 1024)
        } else if let Some(num) = s.strip_suffix('k') {
            scaled(num, 1000)
        } else if let Some(num) = s.strip_suffix('M') {
            scaled(num, 1000 * 1000)
        } else if let Some(num) = s.strip_suffix('G') {
            scaled(num, 1000 * 1000 * 1000)
        } else {
            // Plain bytes
            s.parse::<i64>().map_err(|e| e.to_string())
        }?;
        if bytes < 0 {
            return Err(format!("Memory value is negative: {}", s));
        }
        Ok(bytes)
    }

    /// Build a vector from `name -> quantity string` pairs.
    ///
    /// Unlike the lenient readers used for display, a malformed quantity is
    /// an error here: a request that cannot be read must not be treated as
    /// zero.
    pub fn from_quantity_map<'a, I>(resources: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a str)>,
    {
        let mut out = Self::default();
        for (name, value) in resources {
            match name.as_str() {
                "cpu" => {
                    out.cpu_millicores = Self::parse_cpu(value)
                        .map_err(|_| KestrelError::invalid_quantity("cpu", value))?;
                }
                "memory" => {
                    out.memory_bytes = Self::parse_memory(value)
                        .map_err(|_| KestrelError::invalid_quantity("memory", value))?;
                }
                other => {
                    let amount = value
                        .parse::<i64>()
                        .ok()
                        .filter(|amount| *amount >= 0)
                        .ok_or_else(|| KestrelError::invalid_quantity(other, value))?;
                    out.extended.insert(other.to_string(), amount);
                }
            }
        }
        Ok(out)
    }

    /// Get CPU and memory from a resource map (k8s-openapi format)
    pub fn from_k8s_resource_map(
        resources: &BTreeMap<String, k8s_openapi::apimachinery::pkg::api::resource::Quantity>,
    ) -> Result<Self> {
        Self::from_quantity_map(resources.iter().map(|(k, q)| (k, q.0.as_str())))
    }

    /// Name of the first negative component, if any
    pub fn first_negative(&self) -> Option<String> {
        if self.cpu_millicores < 0 {
            return Some("cpu".to_string());
        }
        if self.memory_bytes < 0 {
            return Some("memory".to_string());
        }
        self.extended
            .iter()
            .find(|(_, amount)| **amount < 0)
            .map(|(name, _)| name.clone())
    }

    /// Whether every component is zero
    pub fn is_zero(&self) -> bool {
        self.cpu_millicores == 0
            && self.memory_bytes == 0
            && self.extended.values().all(|v| *v == 0)
    }

    /// Component-wise sum
    pub fn add(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.cpu_millicores = out.cpu_millicores.saturating_add(other.cpu_millicores);
        out.memory_bytes = out.memory_bytes.saturating_add(other.memory_bytes);
        for (name, amount) in &other.extended {
            let entry = out.extended.entry(name.clone()).or_insert(0);
            *entry = entry.saturating_add(*amount);
        }
        out
    }

    /// Component-wise difference. Results may go negative, which callers
    /// read as over-commitment.
    pub fn sub(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.cpu_millicores = out.cpu_millicores.saturating_sub(other.cpu_millicores);
        out.memory_bytes = out.memory_bytes.saturating_sub(other.memory_bytes);
        for (name, amount) in &other.extended {
            let entry = out.extended.entry(name.clone()).or_insert(0);
            *entry = entry.saturating_sub(*amount);
        }
        out
    }

    /// Whether this request fits inside `available`
    pub fn fits_within(&self, available: &Self) -> bool {
        self.insufficient(available).is_empty()
    }

    /// Names of the resources for which `available` does not cover this
    /// request, in a stable order (cpu, memory, then extended by name)
    pub fn insufficient(&self, available: &Self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.cpu_millicores > available.cpu_millicores {
            missing.push("cpu".to_string());
        }
        if self.memory_bytes > available.memory_bytes {
            missing.push("memory".to_string());
        }
        for (name, amount) in &self.extended {
            if *amount > 0 && *amount > available.extended.get(name).copied().unwrap_or(0) {
                missing.push(name.clone());
            }
        }
        missing
    }

    /// Ordering key used wherever capacities are compared: cpu, then
    /// memory, then the sum of extended resources
    pub fn ordering_key(&self) -> (i64, i64, i64) {
        (
            self.cpu_millicores,
            self.memory_bytes,
            self.extended.values().fold(0i64, |acc, v| acc.saturating_add(*v)),
        )
    }
}

impl fmt::Display for ResourceQuantities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={}m memory={}",
            self.cpu_millicores, self.memory_bytes
        )?;
        for (name, amount) in &self.extended {
            write!(f, " {}={}", name, amount)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu() {
        assert_eq!(ResourceQuantities::parse_cpu("1").unwrap(), 1000);
        assert_eq!(ResourceQuantities::parse_cpu("0.5").unwrap(), 500);
        assert_eq!(ResourceQuantities::parse_cpu("100m").unwrap(), 100);
        assert_eq!(ResourceQuantities::parse_cpu("2").unwrap(), 2000);
        assert!(ResourceQuantities::parse_cpu("two").is_err());
    }

    #[test]
    fn test_parse_cpu_rejects_negative_and_non_finite() {
        for bad in ["-4", "-100m", "-0.5", "NaN", "inf", "-inf"] {
            assert!(ResourceQuantities::parse_cpu(bad).is_err(), "{} accepted", bad);
        }
        assert_eq!(ResourceQuantities::parse_cpu("0").unwrap(), 0);
    }

    #[test]
    fn test_parse_memory_rejects_negative() {
        assert!(ResourceQuantities::parse_memory("-1").is_err());
        assert!(ResourceQuantities::parse_memory("-128Mi").is_err());
    }

    #[test]
    fn test_from_quantity_map_rejects_negative() {
        let cases = [
            ("cpu", "-4"),
            ("cpu", "NaN"),
            ("memory", "-1Gi"),
            ("example.com/gpu", "-1"),
        ];
        for (name, value) in cases {
            let mut map = BTreeMap::new();
            map.insert(name.to_string(), value.to_string());
            let result =
                ResourceQuantities::from_quantity_map(map.iter().map(|(k, v)| (k, v.as_str())));
            assert!(
                matches!(result, Err(KestrelError::InvalidQuantity { .. })),
                "{}={} accepted",
                name,
                value
            );
        }
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(ResourceQuantities::parse_memory("1024").unwrap(), 1024);
        assert_eq!(ResourceQuantities::parse_memory("1Ki").unwrap(), 1024);
        assert_eq!(
            ResourceQuantities::parse_memory("128Mi").unwrap(),
            128 * 1024 * 1024
        );
        assert_eq!(
            ResourceQuantities::parse_memory("1Gi").unwrap(),
            1024 * 1024 * 1024
        );
        assert_eq!(ResourceQuantities::parse_memory("1G").unwrap(), 1_000_000_000);
    }

    #[test]
    fn test_from_quantity_map_rejects_garbage() {
        let mut map = BTreeMap::new();
        map.insert("cpu".to_string(), "lots".to_string());
        let result =
            ResourceQuantities::from_quantity_map(map.iter().map(|(k, v)| (k, v.as_str())));
        assert!(matches!(result, Err(KestrelError::InvalidQuantity { .. })));
    }

    #[test]
    fn test_from_quantity_map_extended() {
        let mut map = BTreeMap::new();
        map.insert("cpu".to_string(), "250m".to_string());
        map.insert("example.com/gpu".to_string(), "2".to_string());
        let q = ResourceQuantities::from_quantity_map(map.iter().map(|(k, v)| (k, v.as_str())))
            .unwrap();
        assert_eq!(q.cpu_millicores, 250);
        assert_eq!(q.extended.get("example.com/gpu"), Some(&2));
    }

    #[test]
    fn test_fits_and_insufficient() {
        let node = ResourceQuantities::new(4000, 8 * 1024).with_extended("gpu", 1);
        let small = ResourceQuantities::new(1000, 1024);
        let big = ResourceQuantities::new(5000, 16 * 1024).with_extended("gpu", 2);

        assert!(small.fits_within(&node));
        assert_eq!(big.insufficient(&node), vec!["cpu", "memory", "gpu"]);
    }

    #[test]
    fn test_add_sub() {
        let a = ResourceQuantities::new(1000, 100).with_extended("gpu", 1);
        let b = ResourceQuantities::new(500, 50);
        let sum = a.add(&b);
        assert_eq!(sum.cpu_millicores, 1500);
        assert_eq!(sum.sub(&a), ResourceQuantities::new(500, 50).with_extended("gpu", 0));
        assert!(ResourceQuantities::default().is_zero());
    }
}

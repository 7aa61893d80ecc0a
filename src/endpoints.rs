use anyhow::{bail, Result};

/// Resolve the ECR FIPS endpoint URL for a region
///
/// FIPS endpoints follow the `ecr-fips.{region}.{dns-suffix}` convention.
/// They exist in the commercial and GovCloud partitions as well as the
/// isolated partitions (which use their own DNS suffixes); the China
/// partition has no FIPS endpoint.
pub fn fips_endpoint_for(region: &str) -> Result<String> {
    if region.is_empty() {
        bail!("cannot resolve a FIPS endpoint without a region");
    }

    let dns_suffix = if region.starts_with("cn-") {
        bail!("no ECR FIPS endpoint exists for region '{}'", region);
    } else if region.starts_with("us-isob-") {
        "sc2s.sgov.gov"
    } else if region.starts_with("us-iso-") {
        "c2s.ic.gov"
    } else {
        "amazonaws.com"
    };

    Ok(format!("https://ecr-fips.{}.{}", region, dns_suffix))
}

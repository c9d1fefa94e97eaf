use http::Uri;

/// The region used when none can be derived from the request target.
pub const DEFAULT_REGION: &str = "us-east-1";

const AMAZON_SUFFIX: &str = ".amazonaws.com";
const AMAZON_CN_SUFFIX: &str = ".amazonaws.com.cn";
const CHINA_REGION: &str = "cn-north-1";

/// Splits an AWS S3 host into its labels (without the amazonaws suffix) and the
/// position of the `s3` endpoint label. Returns `None` for non-AWS hosts.
fn s3_labels(uri: &Uri) -> Option<(Vec<&str>, Option<usize>, bool)> {
    let host = uri.host()?;
    let (rest, china) = if let Some(rest) = host.strip_suffix(AMAZON_CN_SUFFIX) {
        (rest, true)
    } else {
        (host.strip_suffix(AMAZON_SUFFIX)?, false)
    };
    let labels: Vec<&str> = rest.split('.').collect();
    let endpoint = labels
        .iter()
        .rposition(|l| *l == "s3" || l.starts_with("s3-"));
    Some((labels, endpoint, china))
}

/// Derives the AWS region from an S3 request URL.
///
/// Recognises path-style and virtual-host-style endpoints of the forms
/// `s3.<region>.amazonaws.com`, `s3-<region>.amazonaws.com` and
/// `s3.dualstack.<region>.amazonaws.com`. The global endpoints
/// (`s3.amazonaws.com`, `s3-external-1`) carry no region.
pub fn region_from_url(uri: &Uri) -> Option<String> {
    let (labels, endpoint, china) = s3_labels(uri)?;
    let fallback = || china.then(|| CHINA_REGION.to_string());

    let Some(idx) = endpoint else {
        return fallback();
    };
    let label = labels[idx];
    let region = if let Some(region) = label.strip_prefix("s3-") {
        match region {
            "external-1" | "accelerate" => None,
            region => Some(region),
        }
    } else {
        match labels.get(idx + 1) {
            Some(&"dualstack") => labels.get(idx + 2).copied(),
            next => next.copied(),
        }
    };
    region.map(str::to_string).or_else(fallback)
}

/// Returns the bucket of a virtual-host-style S3 URL
/// (`<bucket>.s3.<region>.amazonaws.com`), if any.
pub fn virtual_host_bucket(uri: &Uri) -> Option<String> {
    let (labels, endpoint, _) = s3_labels(uri)?;
    match endpoint? {
        0 => None,
        idx => Some(labels[..idx].join(".")),
    }
}

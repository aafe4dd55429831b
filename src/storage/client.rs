use aws_config::Region;
use aws_credential_types::Credentials as SdkCredentials;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::Client;

use crate::session::Credentials;

pub fn create_s3_client(credentials: &Credentials) -> Client {
    let sdk_credentials = SdkCredentials::new(
        &credentials.access_key_id,
        &credentials.secret_access_key,
        credentials.session_token.clone(),
        None,
        "bucketview",
    );

    let mut builder = S3ConfigBuilder::new()
        .credentials_provider(sdk_credentials)
        .region(Region::new(credentials.region.clone()));

    if let Some(endpoint_url) = credentials.endpoint_url.as_deref() {
        let endpoint_url = endpoint_url.trim();
        if !endpoint_url.is_empty() {
            builder = builder.endpoint_url(endpoint_url);
        }
    }

    if credentials.force_path_style {
        builder = builder.force_path_style(true);
    }

    Client::from_conf(builder.build())
}

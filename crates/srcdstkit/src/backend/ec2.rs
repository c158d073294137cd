//! EC2 backend using the AWS SDK.

use super::AttributeClient;
use crate::error::{Error, Result};
use crate::provider_id::InstanceId;
use aws_config::BehaviorVersion;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::AttributeBooleanValue;
use log::{debug, info};
use std::time::Duration;
use tokio::runtime::Handle;

/// Settings for the EC2 client.
#[derive(Debug, Clone, Default)]
pub struct Ec2Options {
    /// Region override; the default AWS provider chain is used when unset
    pub region: Option<String>,
    /// Deadline for a single API operation, retries included
    pub operation_timeout: Option<Duration>,
}

/// Disables source/destination check through `ModifyInstanceAttribute`.
pub struct Ec2AttributeClient {
    client: aws_sdk_ec2::Client,
    handle: Handle,
}

impl Ec2AttributeClient {
    /// Load AWS configuration and build a client.
    ///
    /// Fails if no region can be determined, since every call would fail.
    pub fn connect(handle: Handle, options: &Ec2Options) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &options.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(timeout) = options.operation_timeout {
            loader = loader.timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(timeout)
                    .build(),
            );
        }

        let sdk_config = handle.block_on(loader.load());
        let region = sdk_config
            .region()
            .ok_or_else(|| {
                Error::Other(
                    "no AWS region configured; pass --region or set AWS_REGION".to_string(),
                )
            })?
            .to_string();
        info!("EC2 client ready in region {}", region);

        Ok(Self {
            client: aws_sdk_ec2::Client::new(&sdk_config),
            handle,
        })
    }
}

impl AttributeClient for Ec2AttributeClient {
    fn disable_source_dest_check(&self, instance_id: &InstanceId) -> Result<()> {
        debug!("Calling ModifyInstanceAttribute for {}", instance_id);
        let request = self
            .client
            .modify_instance_attribute()
            .instance_id(instance_id.as_str())
            .source_dest_check(AttributeBooleanValue::builder().value(false).build());

        self.handle
            .block_on(request.send())
            .map(|_| ())
            .map_err(|e| Error::AttributeCall {
                instance_id: instance_id.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })
    }
}

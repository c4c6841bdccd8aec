use serde_json::json;
use tracing::{error, info};

use crate::error::{RemoteError, SyncError};
use crate::messages::Messages;
use crate::remote::{RemoteRequest, RemoteResourceClient, id_field, row_values};
use crate::spec::page::Page;

pub const SURVEYS_RESOURCE: &str = "surveys";
pub const GENERATED_SURVEY_DESCRIPTION: &str = "Survey dataset generated by iform_layout_builder.";

/// Creates the warehouse survey dataset a form page records into.
#[derive(Debug)]
pub struct SurveyProvisioner<'a, C: ?Sized> {
    client: &'a C,
    website_id: i64,
}

impl<'a, C> SurveyProvisioner<'a, C>
where
    C: RemoteResourceClient + ?Sized,
{
    pub fn new(client: &'a C, website_id: i64) -> Self {
        Self { client, website_id }
    }

    /// Returns the page's survey id, creating the survey first if the page
    /// has none. The new id is written onto the page.
    pub fn ensure_survey(&self, page: &mut Page, messages: &mut Messages) -> Result<i64, SyncError> {
        if let Some(survey_id) = page.survey_id {
            return Ok(survey_id);
        }
        let submission = json!({
            "values": {
                "website_id": self.website_id,
                "title": page.title,
                "description": GENERATED_SURVEY_DESCRIPTION,
            }
        });
        let request = RemoteRequest::post(SURVEYS_RESOURCE, submission);
        let outcome = self.client.request(&request).and_then(|response| {
            if response.status == 201 {
                row_values(&response.body)
                    .and_then(|values| id_field(values, "id"))
                    .ok_or_else(|| RemoteError::Malformed {
                        path: SURVEYS_RESOURCE.into(),
                        detail: "created survey has no id".into(),
                    })
            } else {
                // Anything but a creation counts as a failure, even a 200.
                let status = response.status;
                let body = response.body.clone();
                match response.into_result(SURVEYS_RESOURCE) {
                    Err(err) => Err(err),
                    Ok(_) => Err(RemoteError::Status {
                        status,
                        code: format!("HTTP {status}"),
                        message: body
                            .get("message")
                            .and_then(|message| message.as_str())
                            .unwrap_or("survey was not created")
                            .to_string(),
                    }),
                }
            }
        });

        match outcome {
            Ok(survey_id) => {
                page.survey_id = Some(survey_id);
                info!(page = page.id, survey_id, "created survey dataset");
                messages.status(format!(
                    "A survey dataset has been created on the warehouse with ID {survey_id}. Use the layout tab to configure the form."
                ));
                Ok(survey_id)
            }
            Err(err) => {
                let (_, message) = err.summary();
                error!(page = page.id, request = ?request, error = %err, "attempt to save a survey failed");
                messages.error(format!("Attempt to save a survey failed: {message}"));
                Err(SyncError::SurveyCreation {
                    status: err.status(),
                    message,
                })
            }
        }
    }
}

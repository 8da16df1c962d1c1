use std::time::Duration;

use netclient::prelude::{
    CompletionContext, MimeType, MultipartBody, MultipartPart, NetworkClient, NetworkRequest,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = NetworkClient::builder("https://httpbin.org")
        .timeout(Duration::from_secs(30))
        .request_logger(|text| println!("{text}"))
        .response_logger(|text, success| {
            if !success {
                eprintln!("{text}");
            }
        })
        .try_build()?;

    let mut body = MultipartBody::new()
        .part(MultipartPart::string("quarterly report", "title"))
        .part(MultipartPart::text("plain notes", "notes"))
        .part(
            MultipartPart::data(vec![0_u8; 256 * 1024], "attachment")
                .filename("report.bin")
                .mime_type(MimeType::Binary),
        );
    if let Some(path) = std::env::args().nth(1) {
        body.add(MultipartPart::file(&path, "upload")?);
    }
    println!(
        "uploading {} parts, {} bytes encoded, via temp file: {}",
        body.parts().len(),
        body.encoded_len(),
        body.streams_to_file()
    );

    let response = client
        .send_dictionary(
            NetworkRequest::post("/post")
                .multipart(body)
                .on_upload_progress(CompletionContext::Inline, |progress| {
                    if let Some(fraction) = progress.fraction() {
                        println!("uploaded {:.0}%", fraction * 100.0);
                    }
                }),
        )
        .await;

    let form = response
        .into_result()?
        .and_then(|body| body.get("form").cloned());
    println!("server saw form fields: {form:?}");
    Ok(())
}

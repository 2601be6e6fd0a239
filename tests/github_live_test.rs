use classroom::config::CourseConfig;
use classroom::github::{GitHubConfig, GitHubHttpClient, RemoteService};

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored --test-threads=1
async fn test_connect_and_read_workspace() {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = CourseConfig::new_from_env().expect("Failed to load course config");
    let github = GitHubHttpClient::connect(GitHubConfig::from(&config))
        .await
        .expect("Failed to authenticate");

    let exists = github
        .repository_exists(&config.workspace_repo)
        .await
        .expect("Failed to query workspace repository");
    println!("Workspace {} exists: {}", config.workspace_repo, exists);

    if exists {
        let status = github
            .get_file(&config.workspace_repo, &config.assessment_status_path(), &config.main_branch)
            .await
            .expect("Failed to read status document");
        println!("Status document present: {}", status.is_some());
    }
}

#[tokio::test]
#[ignore]
async fn test_bad_token_is_an_authentication_error() {
    dotenvy::dotenv().ok();

    let mut config = CourseConfig::new_from_env().expect("Failed to load course config");
    config.api_token = "invalid-token".to_string();

    let result = GitHubHttpClient::connect(GitHubConfig::from(&config)).await;
    assert!(matches!(result, Err(classroom::error::AppError::Authentication(_))));
}

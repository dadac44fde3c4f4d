pub trait Notifier {
    /// Publishes to `topic_arn` and returns the message id.
    fn publish(&self, topic_arn: &str, subject: &str, message: &str) -> Result<String, String>;
}

/*!
Ordered, user-editable operation queue with CSV persistence.

Queue files are three-column CSV (`type,params,description`) where `params`
is a JSON object string.
*/

use crate::error::{Result, SharedError};
use crate::operation::{Operation, OperationKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Column names of a queue file, in order
pub const CSV_HEADER: [&str; 3] = ["type", "params", "description"];

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    #[serde(rename = "type")]
    kind: String,
    params: String,
    description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationQueue {
    operations: Vec<Operation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_operations(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    /// Append an operation
    pub fn add(&mut self, operation: Operation) {
        info!("Added to queue: {}", operation.description);
        self.operations.push(operation);
    }

    /// Insert an operation before `index` (or append when `index == len`)
    pub fn insert(&mut self, index: usize, operation: Operation) -> Result<()> {
        if index > self.operations.len() {
            return Err(self.index_error(index));
        }
        info!("Inserted into queue at {}: {}", index + 1, operation.description);
        self.operations.insert(index, operation);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Operation> {
        self.check_index(index)?;
        let removed = self.operations.remove(index);
        info!("Removed from queue: {}", removed.description);
        Ok(removed)
    }

    pub fn clear(&mut self) {
        self.operations.clear();
        info!("Queue cleared");
    }

    /// Insert a copy of the operation right after it
    pub fn duplicate(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let copy = self.operations[index].clone();
        self.operations.insert(index + 1, copy);
        debug!("Duplicated queue entry {}", index + 1);
        Ok(())
    }

    /// Swap with the previous entry; returns the new index
    pub fn move_up(&mut self, index: usize) -> Result<usize> {
        self.check_index(index)?;
        if index == 0 {
            return Err(SharedError::invalid_operation(
                "operation is already at the top of the queue",
            ));
        }
        self.operations.swap(index, index - 1);
        Ok(index - 1)
    }

    /// Swap with the next entry; returns the new index
    pub fn move_down(&mut self, index: usize) -> Result<usize> {
        self.check_index(index)?;
        if index + 1 == self.operations.len() {
            return Err(SharedError::invalid_operation(
                "operation is already at the bottom of the queue",
            ));
        }
        self.operations.swap(index, index + 1);
        Ok(index + 1)
    }

    pub fn get(&self, index: usize) -> Option<&Operation> {
        self.operations.get(index)
    }

    /// Replace the parameters of one entry, validating the result first
    pub fn replace_params(&mut self, index: usize, params: Map<String, Value>) -> Result<()> {
        self.check_index(index)?;
        let mut candidate = self.operations[index].clone();
        candidate.params = params;
        candidate.command()?;
        self.operations[index] = candidate;
        info!("Edited queue entry {}", index + 1);
        Ok(())
    }

    /// Set one parameter on every entry (e.g. a common delay). Nothing
    /// changes unless every updated entry still validates.
    pub fn apply_to_all(&mut self, key: &str, value: Value) -> Result<()> {
        let mut updated = self.operations.clone();
        for (index, operation) in updated.iter_mut().enumerate() {
            operation.set_param(key, value.clone());
            operation.command().map_err(|e| {
                SharedError::invalid_operation(format!(
                    "{}={} breaks entry {} ({}): {}",
                    key,
                    value,
                    index + 1,
                    operation.description,
                    e
                ))
            })?;
        }
        self.operations = updated;
        info!("Applied {}={} to {} operations", key, value, self.operations.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Numbered lines for list displays (`"1. Servo: ..."`)
    pub fn display_lines(&self) -> Vec<String> {
        self.operations
            .iter()
            .enumerate()
            .map(|(i, op)| format!("{}. {}", i + 1, op.description))
            .collect()
    }

    /// Parse a queue file; every row is validated before anything is returned
    pub fn read_csv<R: Read>(reader: R) -> Result<Vec<Operation>> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        for column in CSV_HEADER {
            if !headers.iter().any(|h| h == column) {
                return Err(SharedError::invalid_operation(format!(
                    "queue file is missing the '{}' column",
                    column
                )));
            }
        }

        let mut operations = Vec::new();
        for (i, row) in csv_reader.deserialize::<CsvRow>().enumerate() {
            // header is line 1
            let line = i + 2;
            let row = row.map_err(|e| row_error(line, e))?;
            operations.push(parse_row(row).map_err(|e| row_error(line, e))?);
        }

        Ok(operations)
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for operation in &self.operations {
            csv_writer.serialize(CsvRow {
                kind: operation.kind.as_str().to_string(),
                params: operation.params_json()?,
                description: operation.description.clone(),
            })?;
        }
        if self.operations.is_empty() {
            csv_writer.write_record(CSV_HEADER)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Replace the queue with the contents of a CSV file; returns the entry count.
    /// On error the queue is left unchanged.
    pub fn import_csv<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let file = File::open(path.as_ref())?;
        let operations = Self::read_csv(file)?;
        let count = operations.len();
        self.operations = operations;
        info!(
            "✅ Imported {} operations from {}",
            count,
            path.as_ref().display()
        );
        Ok(count)
    }

    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        self.write_csv(file)?;
        info!(
            "✅ Exported {} operations to {}",
            self.operations.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.operations.len() {
            Ok(())
        } else {
            Err(self.index_error(index))
        }
    }

    fn index_error(&self, index: usize) -> SharedError {
        SharedError::invalid_operation(format!(
            "no operation at position {} (queue has {})",
            index + 1,
            self.operations.len()
        ))
    }
}

impl<'a> IntoIterator for &'a OperationQueue {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

fn parse_row(row: CsvRow) -> Result<Operation> {
    let kind = OperationKind::from_str(&row.kind).ok_or_else(|| {
        SharedError::invalid_operation(format!("unknown operation type '{}'", row.kind))
    })?;

    let params = if row.params.trim().is_empty() {
        Map::new()
    } else {
        match serde_json::from_str::<Value>(&row.params)? {
            Value::Object(map) => map,
            other => {
                return Err(SharedError::invalid_operation(format!(
                    "params must be a JSON object, got {}",
                    other
                )))
            }
        }
    };

    let operation = Operation::new(kind, params, row.description);
    operation.command()?;
    Ok(operation)
}

fn row_error(line: usize, err: impl std::fmt::Display) -> SharedError {
    SharedError::invalid_operation(format!("queue file line {}: {}", line, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::Direction;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn sample_queue() -> OperationQueue {
        let mut queue = OperationQueue::new();
        queue.add(Operation::home());
        queue.add(Operation::servo(63));
        queue.add(Operation::stepper_steps(2328, Direction::Up, 80, 5.0));
        queue.add(Operation::led_color("#B00B69").unwrap());
        queue.add(Operation::led_brightness(69));
        queue.add(Operation::button());
        queue.add(Operation::photo(2.0, 1));
        queue
    }

    #[test]
    fn test_csv_roundtrip() {
        let queue = sample_queue();
        let temp_file = NamedTempFile::new().unwrap();

        queue.export_csv(temp_file.path()).unwrap();
        let mut loaded = OperationQueue::new();
        let count = loaded.import_csv(temp_file.path()).unwrap();

        assert_eq!(count, queue.len());
        assert_eq!(loaded, queue);
    }

    #[test]
    fn test_reads_spaced_json_params() {
        // spaced JSON and quoted params as written by other CSV tools
        let content = "type,params,description\r\n\
            home,{},Execute home function\r\n\
            servo,\"{\"\"angle\"\": 63}\",Point 1: Set servo to 63° (Y=0.0cm)\r\n\
            photo,\"{\"\"delay\"\": 2.0}\",Point 1: Capture photo\r\n\
            stepper,\"{\"\"steps\"\": 4656, \"\"direction\"\": 1, \"\"speed\"\": 80}\",\"Move 10.00cm forward (4656 steps)\"\r\n";

        let operations = OperationQueue::read_csv(content.as_bytes()).unwrap();
        assert_eq!(operations.len(), 4);
        assert_eq!(operations[1].kind, OperationKind::Servo);
        assert_eq!(operations[1].params.get("angle"), Some(&json!(63)));
        assert_eq!(operations[2].params.get("delay"), Some(&json!(2.0)));
        assert_eq!(operations[3].description, "Move 10.00cm forward (4656 steps)");
    }

    #[test]
    fn test_malformed_import_leaves_queue_unchanged() {
        let mut queue = sample_queue();
        let before = queue.clone();

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(
            temp_file,
            "type,params,description\nservo,\"{{\"\"angle\"\": 10}}\",ok\nlaser,{{}},bad type\n"
        )
        .unwrap();

        let err = queue.import_csv(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("line 3"), "{}", err);
        assert_eq!(queue, before);
    }

    #[test]
    fn test_rejects_bad_params() {
        let not_object = "type,params,description\nservo,[1,2],x\n";
        assert!(OperationQueue::read_csv(not_object.as_bytes()).is_err());

        let bad_json = "type,params,description\nservo,{angle: 1},x\n";
        assert!(OperationQueue::read_csv(bad_json.as_bytes()).is_err());

        let out_of_range = "type,params,description\nservo,\"{\"\"angle\"\": 91}\",x\n";
        assert!(OperationQueue::read_csv(out_of_range.as_bytes()).is_err());

        let missing_column = "type,description\nhome,x\n";
        assert!(OperationQueue::read_csv(missing_column.as_bytes()).is_err());
    }

    #[test]
    fn test_unknown_params_survive_roundtrip() {
        let mut queue = OperationQueue::new();
        let mut op = Operation::servo(10);
        op.set_param("note", json!("keep me"));
        queue.add(op);

        let mut buffer = Vec::new();
        queue.write_csv(&mut buffer).unwrap();
        let loaded = OperationQueue::read_csv(buffer.as_slice()).unwrap();
        assert_eq!(loaded[0].params.get("note"), Some(&json!("keep me")));
    }

    #[test]
    fn test_empty_export_has_header() {
        let mut buffer = Vec::new();
        OperationQueue::new().write_csv(&mut buffer).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "type,params,description\n");
        assert!(OperationQueue::read_csv("type,params,description\n".as_bytes())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_editing() {
        let mut queue = sample_queue();
        let len = queue.len();

        queue.duplicate(1).unwrap();
        assert_eq!(queue.len(), len + 1);
        assert_eq!(queue.get(1), queue.get(2));

        assert_eq!(queue.move_up(3).unwrap(), 2);
        assert_eq!(queue.get(2).unwrap().kind, OperationKind::Stepper);
        assert!(queue.move_up(0).is_err());
        assert!(queue.move_down(queue.len() - 1).is_err());
        assert_eq!(queue.move_down(0).unwrap(), 1);
        assert_eq!(queue.get(0).unwrap().kind, OperationKind::Servo);

        let removed = queue.remove(0).unwrap();
        assert_eq!(removed.kind, OperationKind::Servo);
        assert!(queue.remove(100).is_err());

        queue.insert(0, Operation::button()).unwrap();
        assert_eq!(queue.get(0).unwrap().kind, OperationKind::Button);
        assert!(queue.insert(queue.len() + 1, Operation::button()).is_err());

        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_replace_params_validates() {
        let mut queue = sample_queue();
        let mut params = Map::new();
        params.insert("angle".into(), json!(200));
        assert!(queue.replace_params(1, params).is_err());
        assert_eq!(queue.get(1).unwrap().params.get("angle"), Some(&json!(63)));

        let mut params = Map::new();
        params.insert("angle".into(), json!(12));
        params.insert("delay".into(), json!(1.0));
        queue.replace_params(1, params).unwrap();
        assert_eq!(queue.get(1).unwrap().params.get("angle"), Some(&json!(12)));
    }

    #[test]
    fn test_unbounded_photo_delay_rejected_on_import() {
        let content = "type,params,description\nhome,{},Home\nphoto,\"{\"\"delay\"\": 1e20}\",slow photo\n";
        let err = OperationQueue::read_csv(content.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 3"), "{}", err);
    }

    #[test]
    fn test_apply_to_all_validates_every_entry() {
        let mut queue = sample_queue();
        let before = queue.clone();

        let err = queue.apply_to_all("delay", json!(-1)).unwrap_err();
        assert!(err.to_string().contains("entry 7"), "{}", err);
        assert_eq!(queue, before);
    }

    #[test]
    fn test_apply_to_all_and_display() {
        let mut queue = sample_queue();
        queue.apply_to_all("delay", json!(1.5)).unwrap();
        assert!(queue.iter().all(|op| op.params.get("delay") == Some(&json!(1.5))));

        let lines = queue.display_lines();
        assert_eq!(lines[0], "1. Home: Return to home position");
        assert_eq!(lines[1], "2. Servo: Set angle to 63°");
    }
}
